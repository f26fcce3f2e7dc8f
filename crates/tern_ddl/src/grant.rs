//! GRANT / REVOKE on distributed tables.
//!
//! Each distributed table named by the statement, directly or through
//! `ALL TABLES IN SCHEMA`, gets its own job carrying a statement rewritten to
//! target only that table.

use tern_common::error::DdlError;
use tern_common::types::RangeVar;
use tern_common::TernResult;

use crate::catalog::MetadataCatalog;
use crate::context::CommandContext;
use crate::deparse::{grant_sql, privileges_sql, role_spec_sql};
use crate::render::qualified_relation_name;
use crate::statement::*;
use crate::task::{DdlCommand, DdlJob, JobIdAllocator};
use crate::task_list::ddl_task_list;

pub fn plan_grant(
    ctx: &CommandContext,
    catalog: &dyn MetadataCatalog,
    jobs: &JobIdAllocator,
    stmt: &GrantStmt,
) -> TernResult<Vec<DdlJob>> {
    if stmt.object_type != GrantObjectType::Table {
        return Ok(Vec::new());
    }

    let candidates = match &stmt.target {
        GrantTarget::Objects(objects) => objects
            .iter()
            .filter_map(|rv| catalog.resolve_relation(rv, &ctx.session.search_path))
            .collect::<Vec<_>>(),
        GrantTarget::AllInSchema(schemas) => schemas
            .iter()
            .flat_map(|schema| catalog.relations_in_schema(schema))
            .collect(),
    };
    let distributed: Vec<_> = candidates
        .into_iter()
        .filter_map(|id| catalog.distributed_relation(id))
        .collect();
    if distributed.is_empty() {
        return Ok(Vec::new());
    }

    if stmt.privileges.iter().any(|p| !p.columns.is_empty()) {
        return Err(DdlError::unsupported("grant/revoke on column list is currently unsupported").into());
    }

    let privileges = privileges_sql(&stmt.privileges);
    let grantees = stmt
        .grantees
        .iter()
        .map(role_spec_sql)
        .collect::<Vec<_>>()
        .join(", ");

    let mut planned = Vec::with_capacity(distributed.len());
    for relation in distributed {
        let text = grant_sql(
            stmt.is_grant,
            &privileges,
            &qualified_relation_name(&relation.name),
            &grantees,
            stmt.grant_option,
        );
        let single = GrantStmt {
            target: GrantTarget::Objects(vec![RangeVar::qualified(
                relation.name.schema.clone(),
                relation.name.name.clone(),
            )]),
            ..stmt.clone()
        };
        let job_id = jobs.next();
        let command = DdlCommand::new(text.clone(), UtilityStmt::Grant(single));
        let tasks = ddl_task_list(catalog, job_id, &relation, &command)?;
        planned.push(DdlJob::new(job_id, relation.id, text).with_tasks(tasks));
    }
    tracing::debug!(jobs = planned.len(), grant = stmt.is_grant, "planned GRANT/REVOKE");
    Ok(planned)
}
