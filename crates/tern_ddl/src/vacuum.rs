//! VACUUM and ANALYZE on distributed tables.
//!
//! Runs after the local command. VACUUM cannot run inside a transaction
//! block, so the first VACUUM of a statement switches the transaction to
//! bare connections; ANALYZE stays inside the coordinated transaction.

use tern_common::config::CommitProtocol;
use tern_common::metadata::DistributedRelation;
use tern_common::types::{JobId, TaskId};
use tern_common::TernResult;

use crate::catalog::MetadataCatalog;
use crate::context::{CommandContext, Notice};
use crate::executor::DdlExecutor;
use crate::lock::LockMode;
use crate::render::{extend_shard_name, quote_identifier};
use crate::statement::{VacuumOptions, VacuumStmt};
use crate::task::{JobIdAllocator, Task, TaskKind};
use crate::task_list::{locked_shards, task_placements};
use crate::transaction::Transaction;

/// A distributed relation named by the statement, with its column list.
#[derive(Debug, Clone, PartialEq)]
pub struct VacuumTarget {
    pub relation: DistributedRelation,
    pub columns: Vec<String>,
}

/// `VACUUM ` or `ANALYZE [VERBOSE ]`, then any remaining options as
/// `(OPT,OPT) `.
pub fn vacuum_prefix(options: &VacuumOptions) -> String {
    let mut prefix = String::new();
    let mut rest = *options;
    if rest.vacuum {
        prefix.push_str("VACUUM ");
    } else {
        prefix.push_str("ANALYZE ");
        rest.analyze = false;
        if rest.verbose {
            prefix.push_str("VERBOSE ");
            rest.verbose = false;
        }
    }

    let mut flags = Vec::new();
    if rest.analyze {
        flags.push("ANALYZE");
    }
    if rest.disable_page_skipping {
        flags.push("DISABLE_PAGE_SKIPPING");
    }
    if rest.freeze {
        flags.push("FREEZE");
    }
    if rest.full {
        flags.push("FULL");
    }
    if rest.verbose {
        flags.push("VERBOSE");
    }
    if !flags.is_empty() {
        prefix.push('(');
        prefix.push_str(&flags.join(","));
        prefix.push_str(") ");
    }
    prefix
}

/// ` (a,b)`, or empty without columns.
pub fn vacuum_column_names(columns: &[String]) -> String {
    if columns.is_empty() {
        return String::new();
    }
    let names: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();
    format!(" ({})", names.join(","))
}

/// Distributed relations the statement should reach on workers. Reports a
/// warning, and returns nothing, when the statement names no table or
/// propagation is disabled.
pub fn vacuum_targets(
    ctx: &mut CommandContext,
    catalog: &dyn MetadataCatalog,
    stmt: &VacuumStmt,
) -> Vec<VacuumTarget> {
    let name = stmt.options.command_name();
    if stmt.relations.is_empty() {
        ctx.report(
            Notice::warning(format!("not propagating {} command to worker nodes", name)).with_hint(
                format!("Provide a specific table in order to {} distributed tables.", name),
            ),
        );
        return Vec::new();
    }

    let targets: Vec<VacuumTarget> = stmt
        .relations
        .iter()
        .filter_map(|r| {
            let id = catalog.resolve_relation(&r.relation, &ctx.session.search_path)?;
            let relation = catalog.distributed_relation(id)?;
            Some(VacuumTarget {
                relation,
                columns: r.columns.clone(),
            })
        })
        .collect();

    if !targets.is_empty() && !ctx.propagation_enabled {
        ctx.report(
            Notice::warning(format!("not propagating {} command to worker nodes", name)).with_hint(
                format!(
                    "Set tern.enable_ddl_propagation to true in order to send targeted {} commands to worker nodes.",
                    name
                ),
            ),
        );
        return Vec::new();
    }
    targets
}

/// One task per shard. The relation is locked locally in the mode the
/// command needs and its shard metadata in share mode.
pub fn vacuum_task_list(
    catalog: &dyn MetadataCatalog,
    job_id: JobId,
    target: &VacuumTarget,
    options: &VacuumOptions,
) -> TernResult<Vec<Task>> {
    let relation = &target.relation;
    let mode = if options.full {
        LockMode::AccessExclusive
    } else {
        LockMode::ShareUpdateExclusive
    };
    catalog.lock_relation(relation.id, mode);

    let prefix = vacuum_prefix(options);
    let columns = vacuum_column_names(&target.columns);
    let shards = locked_shards(catalog, relation);

    let mut tasks = Vec::with_capacity(shards.len());
    for (i, shard) in shards.iter().enumerate() {
        let shard_name = format!(
            "{}.{}",
            quote_identifier(&relation.name.schema),
            quote_identifier(&extend_shard_name(&relation.name.name, shard.shard_id))
        );
        let command = format!("{}{}{}", prefix, shard_name, columns);
        tasks.push(Task {
            job_id,
            task_id: TaskId(i as u32 + 1),
            kind: TaskKind::VacuumAnalyze,
            shard_command: command.clone(),
            command,
            anchor_shard: shard.shard_id,
            placements: task_placements(catalog, shard.shard_id)?,
            relation_shards: Vec::new(),
        });
    }
    tern_observability::record_ddl_tasks(TaskKind::VacuumAnalyze.as_str(), tasks.len());
    Ok(tasks)
}

/// Run the statement's shard commands. Returns the number of relations
/// processed.
pub fn execute_vacuum(
    catalog: &dyn MetadataCatalog,
    executor: &DdlExecutor<'_>,
    jobs: &JobIdAllocator,
    txn: &mut Transaction,
    stmt: &VacuumStmt,
    targets: &[VacuumTarget],
) -> TernResult<usize> {
    let mut executed = 0usize;
    for target in targets {
        if stmt.options.vacuum && executed == 0 {
            txn.mode_mut().switch_commit_protocol(CommitProtocol::Bare);
        }
        let tasks = vacuum_task_list(catalog, jobs.next(), target, &stmt.options)?;
        let sequential = txn.mode().is_sequential();
        let mode = executor.execute_tasks(
            txn,
            &tasks,
            std::slice::from_ref(&target.relation),
            sequential,
        )?;
        tracing::debug!(
            relation = %target.relation.name,
            tasks = tasks.len(),
            mode = mode.as_str(),
            "{} propagated",
            stmt.options.command_name()
        );
        executed += 1;
    }
    Ok(executed)
}
