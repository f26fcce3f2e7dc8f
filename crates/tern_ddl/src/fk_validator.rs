//! Foreign-key rules for distributed relations.
//!
//! A foreign key is only enforceable when each referencing row and the row
//! it points at live on the same worker: either the referenced side is a
//! reference table (present on every worker), or both sides are colocated
//! and the key includes the distribution column at the same position.

use tern_common::error::DdlError;
use tern_common::metadata::{DistributedRelation, DistributionMethod, FkAction, ForeignKeyMeta};
use tern_common::TernResult;

use crate::catalog::MetadataCatalog;

const CANNOT_CREATE: &str = "cannot create foreign key constraint";

pub trait ForeignKeyValidator: Send + Sync {
    /// Check every foreign key declared on `relation`.
    fn validate(&self, catalog: &dyn MetadataCatalog, relation: &DistributedRelation) -> TernResult<()>;
}

/// The rules every cluster enforces.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultForeignKeyValidator;

impl ForeignKeyValidator for DefaultForeignKeyValidator {
    fn validate(&self, catalog: &dyn MetadataCatalog, relation: &DistributedRelation) -> TernResult<()> {
        for fk in catalog.foreign_keys_of(relation.id) {
            check_foreign_key(catalog, relation, &fk)?;
        }
        Ok(())
    }
}

fn check_foreign_key(
    catalog: &dyn MetadataCatalog,
    relation: &DistributedRelation,
    fk: &ForeignKeyMeta,
) -> TernResult<()> {
    if matches!(
        relation.method,
        DistributionMethod::Append | DistributionMethod::Range
    ) {
        return Err(DdlError::unsupported(CANNOT_CREATE)
            .with_detail(format!(
                "Foreign keys are not supported on {}-distributed tables.",
                relation.method.as_str()
            ))
            .into());
    }

    let Some(referenced) = catalog.distributed_relation(fk.referenced) else {
        return Err(DdlError::unsupported(CANNOT_CREATE)
            .with_detail("Referenced table must be a distributed table or a reference table.")
            .into());
    };

    if relation.is_reference() {
        if !referenced.is_reference() {
            return Err(DdlError::unsupported(
                "cannot create foreign key constraint since foreign keys from reference \
                 tables to distributed tables are not supported",
            )
            .with_detail("A reference table can only have reference keys to other reference tables")
            .into());
        }
        return Ok(());
    }

    let dist_column = relation.distribution_column.as_deref();
    let referencing_position = dist_column.and_then(|col| {
        fk.referencing_columns.iter().position(|c| c == col)
    });

    if referencing_position.is_some() {
        for (action, clause) in [(fk.on_delete, "ON DELETE"), (fk.on_update, "ON UPDATE")] {
            if matches!(action, FkAction::SetNull | FkAction::SetDefault) {
                return Err(DdlError::unsupported(CANNOT_CREATE)
                    .with_detail(format!(
                        "SET NULL or SET DEFAULT is not supported in {} operation when \
                         distribution key is included in the foreign key constraint",
                        clause
                    ))
                    .into());
            }
        }
    }

    if referenced.is_reference() {
        return Ok(());
    }

    if referenced.method != DistributionMethod::Hash || referenced.colocation_id != relation.colocation_id {
        return Err(DdlError::unsupported(
            "cannot create foreign key constraint since relations are not colocated or not \
             referencing a reference table",
        )
        .with_detail(
            "A distributed table can only have foreign keys if it is referencing another \
             colocated hash distributed table or a reference table",
        )
        .into());
    }

    let referenced_position = referenced.distribution_column.as_deref().and_then(|col| {
        fk.referenced_columns.iter().position(|c| c == col)
    });
    match (referencing_position, referenced_position) {
        (Some(l), Some(r)) if l == r => Ok(()),
        _ => Err(DdlError::unsupported(CANNOT_CREATE)
            .with_detail(
                "Foreign keys are supported in two cases, either in between two colocated \
                 tables including partition column in the same ordinal in the both tables or \
                 from distributed to reference tables",
            )
            .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::ClusterBuilder;
    use tern_common::types::RelationId;

    fn fk(from: RelationId, to: RelationId, cols: &[&str], ref_cols: &[&str]) -> ForeignKeyMeta {
        ForeignKeyMeta {
            name: "fk".into(),
            referencing: from,
            referenced: to,
            referencing_columns: cols.iter().map(|c| c.to_string()).collect(),
            referenced_columns: ref_cols.iter().map(|c| c.to_string()).collect(),
            on_delete: FkAction::NoAction,
            on_update: FkAction::NoAction,
        }
    }

    fn check(catalog: &dyn MetadataCatalog, relation: RelationId) -> TernResult<()> {
        let rel = catalog.distributed_relation(relation).unwrap();
        DefaultForeignKeyValidator.validate(catalog, &rel)
    }

    #[test]
    fn test_distributed_to_reference_allowed() {
        let mut b = ClusterBuilder::new().workers(2);
        let orders = b.hash_table("public", "orders", "customer_id", 4);
        let warehouses = b.reference_table("public", "warehouses");
        let catalog = b.build();
        catalog.add_foreign_key(fk(orders, warehouses, &["warehouse_id"], &["id"]));
        check(&catalog, orders).unwrap();
    }

    #[test]
    fn test_reference_to_distributed_rejected() {
        let mut b = ClusterBuilder::new().workers(2);
        let orders = b.hash_table("public", "orders", "customer_id", 4);
        let warehouses = b.reference_table("public", "warehouses");
        let catalog = b.build();
        catalog.add_foreign_key(fk(warehouses, orders, &["id"], &["customer_id"]));
        let err = check(&catalog, warehouses).unwrap_err();
        assert!(err.to_string().contains("from reference tables to distributed tables"));
    }

    #[test]
    fn test_colocated_requires_same_ordinal() {
        let mut b = ClusterBuilder::new().workers(2);
        let customers = b.hash_table("public", "customers", "customer_id", 4);
        let orders = b.hash_table("public", "orders", "customer_id", 4);
        let catalog = b.build();

        catalog.add_foreign_key(fk(orders, customers, &["customer_id", "x"], &["customer_id", "y"]));
        check(&catalog, orders).unwrap();

        catalog.add_foreign_key(fk(orders, customers, &["x", "customer_id"], &["customer_id", "y"]));
        let err = check(&catalog, orders).unwrap_err();
        assert!(err.detail().unwrap().contains("same ordinal"));
    }

    #[test]
    fn test_non_colocated_rejected() {
        let mut b = ClusterBuilder::new().workers(2);
        let customers = b.hash_table("public", "customers", "customer_id", 8);
        let orders = b.hash_table("public", "orders", "customer_id", 4);
        let catalog = b.build();
        catalog.add_foreign_key(fk(orders, customers, &["customer_id"], &["customer_id"]));
        let err = check(&catalog, orders).unwrap_err();
        assert!(err.to_string().contains("not colocated"));
    }

    #[test]
    fn test_set_null_on_distribution_column_rejected() {
        let mut b = ClusterBuilder::new().workers(2);
        let orders = b.hash_table("public", "orders", "customer_id", 4);
        let warehouses = b.reference_table("public", "warehouses");
        let catalog = b.build();
        let mut key = fk(orders, warehouses, &["customer_id"], &["id"]);
        key.on_delete = FkAction::SetNull;
        catalog.add_foreign_key(key);
        let err = check(&catalog, orders).unwrap_err();
        assert!(err.detail().unwrap().contains("ON DELETE"));
    }

    #[test]
    fn test_append_tables_rejected() {
        let mut b = ClusterBuilder::new().workers(2);
        let events = b.append_table("public", "events", "ts", 2);
        let warehouses = b.reference_table("public", "warehouses");
        let catalog = b.build();
        catalog.add_foreign_key(fk(events, warehouses, &["warehouse_id"], &["id"]));
        assert!(check(&catalog, events).is_err());
    }
}
