//! Coordinated multi-node transaction state.
//!
//! A `Transaction` owns the worker connections opened on behalf of one
//! session transaction and the execution mode that governs how shard
//! commands may be spread over them. Commit follows the configured
//! protocol:
//!
//! - `1pc`: every connection runs inside BEGIN, and COMMIT is sent before
//!   the local commit.
//! - `2pc`: every connection is prepared before the local commit and
//!   committed with COMMIT PREPARED afterwards. A failure after a successful
//!   prepare cannot be undone and is only logged.
//! - `bare`: commands run outside a transaction block and commit on their own.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tern_common::config::{CommitProtocol, DdlConfig, MultiShardModifyMode};
use tern_common::error::{ClusterError, DdlError};
use tern_common::metadata::{DistributedRelation, NodeKey};
use tern_common::types::{GroupId, RelationId, ShardId};
use tern_common::{TernError, TernResult};

use crate::transport::{WorkerConnection, WorkerTransport};

// ── Execution mode ───────────────────────────────────────────────────

/// How shard commands are spread over connections for the rest of a
/// transaction, and which commit protocol is in force.
#[derive(Debug, Clone)]
pub struct TransactionExecutionMode {
    initial_mode: MultiShardModifyMode,
    mode: MultiShardModifyMode,
    commit_protocol: CommitProtocol,
    saved_commit_protocol: Option<CommitProtocol>,
    /// Relations reached through more than one connection per node.
    parallel_relations: BTreeSet<RelationId>,
    /// Relations that required one connection per node.
    sequential_relations: BTreeSet<RelationId>,
}

impl TransactionExecutionMode {
    pub fn new(mode: MultiShardModifyMode, commit_protocol: CommitProtocol) -> Self {
        Self {
            initial_mode: mode,
            mode,
            commit_protocol,
            saved_commit_protocol: None,
            parallel_relations: BTreeSet::new(),
            sequential_relations: BTreeSet::new(),
        }
    }

    pub fn from_config(config: &DdlConfig) -> Self {
        Self::new(
            config.multi_shard_modify_mode,
            config.multi_shard_commit_protocol,
        )
    }

    pub fn mode(&self) -> MultiShardModifyMode {
        self.mode
    }

    pub fn is_sequential(&self) -> bool {
        self.mode == MultiShardModifyMode::Sequential
    }

    pub fn commit_protocol(&self) -> CommitProtocol {
        self.commit_protocol
    }

    /// Session-level `SET multi_shard_modify_mode`.
    pub fn set_mode(&mut self, mode: MultiShardModifyMode) {
        self.mode = mode;
    }

    /// Switch the commit protocol for the rest of the transaction. The first
    /// switch remembers the previous protocol so `reset` can restore it.
    pub fn switch_commit_protocol(&mut self, protocol: CommitProtocol) {
        if self.commit_protocol == protocol {
            return;
        }
        if self.saved_commit_protocol.is_none() {
            self.saved_commit_protocol = Some(self.commit_protocol);
        }
        tracing::debug!(from = %self.commit_protocol, to = %protocol, "switching commit protocol");
        self.commit_protocol = protocol;
    }

    /// Record that `affected` must be reached over one connection per node.
    /// Fails when a parallel operation already touched one of them.
    pub fn require_sequential(&mut self, affected: &[DistributedRelation]) -> TernResult<()> {
        for relation in affected {
            if !relation.is_reference() && self.parallel_relations.contains(&relation.id) {
                return Err(DdlError::ConflictingExecutionMode {
                    relation: relation.name.to_string(),
                    after_parallel: true,
                }
                .into());
            }
        }
        self.sequential_relations
            .extend(affected.iter().map(|r| r.id));
        Ok(())
    }

    /// `require_sequential`, then run every later shard command of the
    /// transaction over one connection per node.
    pub fn set_sequential(&mut self, affected: &[DistributedRelation]) -> TernResult<()> {
        self.require_sequential(affected)?;
        if self.mode != MultiShardModifyMode::Sequential {
            tracing::debug!("switching to sequential query execution mode");
            self.mode = MultiShardModifyMode::Sequential;
        }
        Ok(())
    }

    /// Fails when one of `affected` was already accessed over a single
    /// connection per node.
    pub fn check_parallel_allowed(&self, affected: &[DistributedRelation]) -> TernResult<()> {
        for relation in affected {
            if !relation.is_reference() && self.sequential_relations.contains(&relation.id) {
                return Err(DdlError::ConflictingExecutionMode {
                    relation: relation.name.to_string(),
                    after_parallel: false,
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn record_parallel_access(&mut self, relations: impl IntoIterator<Item = RelationId>) {
        self.parallel_relations.extend(relations);
    }

    pub fn had_parallel_access(&self, relation: RelationId) -> bool {
        self.parallel_relations.contains(&relation)
    }

    /// Restore the state the transaction started with.
    pub fn reset(&mut self) {
        if let Some(saved) = self.saved_commit_protocol.take() {
            self.commit_protocol = saved;
        }
        self.mode = self.initial_mode;
        self.parallel_relations.clear();
        self.sequential_relations.clear();
    }
}

// ── Worker connections ───────────────────────────────────────────────

/// Identity of one worker connection within a transaction.
///
/// Sequential execution uses one connection per node (`shard == None`);
/// parallel execution uses one per node and anchor shard. Bare connections
/// never open a transaction block.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionKey {
    pub node: NodeKey,
    pub shard: Option<ShardId>,
    pub bare: bool,
}

impl ConnectionKey {
    pub fn per_node(node: NodeKey, bare: bool) -> Self {
        Self {
            node,
            shard: None,
            bare,
        }
    }

    pub fn per_shard(node: NodeKey, shard: ShardId, bare: bool) -> Self {
        Self {
            node,
            shard: Some(shard),
            bare,
        }
    }
}

struct Participant {
    id: u32,
    conn: Box<dyn WorkerConnection>,
    /// BEGIN was sent and the block is still open.
    in_block: bool,
    /// Global id of the prepared transaction, once PREPARE succeeded.
    prepared_gid: Option<String>,
}

/// Worker connections of one transaction, keyed by `ConnectionKey`.
pub struct CoordinatedTransaction {
    transport: Arc<dyn WorkerTransport>,
    participants: BTreeMap<ConnectionKey, Participant>,
    next_connection_id: u32,
}

impl CoordinatedTransaction {
    pub fn new(transport: Arc<dyn WorkerTransport>) -> Self {
        Self {
            transport,
            participants: BTreeMap::new(),
            next_connection_id: 1,
        }
    }

    pub fn transport(&self) -> &Arc<dyn WorkerTransport> {
        &self.transport
    }

    pub fn connection_count(&self) -> usize {
        self.participants.len()
    }

    fn acquire(&mut self, key: &ConnectionKey) -> TernResult<&mut Participant> {
        if !self.participants.contains_key(key) {
            let mut conn = self.transport.connect(&key.node)?;
            let in_block = !key.bare;
            if in_block {
                conn.execute("BEGIN")?;
            }
            let id = self.next_connection_id;
            self.next_connection_id += 1;
            tracing::debug!(node = %key.node, connection = id, bare = key.bare, "opened worker connection");
            self.participants.insert(
                key.clone(),
                Participant {
                    id,
                    conn,
                    in_block,
                    prepared_gid: None,
                },
            );
        }
        self.participants.get_mut(key).ok_or_else(|| {
            TernError::internal_bug(
                "E-TXN-001",
                "connection vanished after acquire",
                key.node.to_string(),
            )
        })
    }

    /// Dispatch without waiting; pair with `wait`.
    pub fn send(&mut self, key: &ConnectionKey, command: &str) -> TernResult<()> {
        self.acquire(key)?.conn.send_command(command)
    }

    pub fn wait(&mut self, key: &ConnectionKey) -> TernResult<()> {
        match self.participants.get_mut(key) {
            Some(p) => p.conn.await_completion(),
            None => Err(TernError::internal_bug(
                "E-TXN-002",
                "wait on a connection that was never opened",
                key.node.to_string(),
            )),
        }
    }

    pub fn execute(&mut self, key: &ConnectionKey, command: &str) -> TernResult<()> {
        self.acquire(key)?.conn.execute(command)
    }

    /// First commit phase, run before the local commit.
    ///
    /// Under `2pc` every open block is prepared as `{gid_prefix}_{connection}`;
    /// under `1pc` every open block is committed. On failure everything still
    /// open is rolled back and the error is returned.
    pub fn prepare_commit(&mut self, protocol: CommitProtocol, gid_prefix: &str) -> TernResult<()> {
        let keys: Vec<ConnectionKey> = self.participants.keys().cloned().collect();
        for key in keys {
            let Some(p) = self.participants.get_mut(&key) else {
                continue;
            };
            if !p.in_block {
                continue;
            }
            let result = match protocol {
                CommitProtocol::TwoPhase => {
                    let gid = format!("{}_{}", gid_prefix, p.id);
                    match p.conn.execute(&format!("PREPARE TRANSACTION '{}'", gid)) {
                        Ok(()) => {
                            p.in_block = false;
                            p.prepared_gid = Some(gid);
                            Ok(())
                        }
                        Err(e) => {
                            tracing::warn!("2PC prepare failed on {}: {}", key.node, e);
                            Err(ClusterError::PrepareFailed {
                                node: key.node.to_string(),
                                gid,
                                message: e.to_string(),
                            }
                            .into())
                        }
                    }
                }
                CommitProtocol::OnePhase | CommitProtocol::Bare => {
                    let r = p.conn.execute("COMMIT");
                    if r.is_ok() {
                        p.in_block = false;
                    }
                    r
                }
            };
            if let Err(e) = result {
                self.abort();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Second commit phase, run after the local commit. Failures cannot be
    /// undone any more and are logged.
    pub fn finish_commit(&mut self) {
        for (key, p) in self.participants.iter_mut() {
            if let Some(gid) = p.prepared_gid.take() {
                if let Err(e) = p.conn.execute(&format!("COMMIT PREPARED '{}'", gid)) {
                    tracing::error!(
                        "2PC commit failed on {} after prepare (gid {}): {}",
                        key.node,
                        gid,
                        e
                    );
                }
            }
        }
        self.participants.clear();
    }

    /// Roll back every open block and every prepared transaction, then drop
    /// all connections.
    pub fn abort(&mut self) {
        for (key, p) in self.participants.iter_mut() {
            let command = if let Some(gid) = p.prepared_gid.take() {
                format!("ROLLBACK PREPARED '{}'", gid)
            } else if p.in_block {
                "ROLLBACK".to_string()
            } else {
                continue;
            };
            if let Err(e) = p.conn.execute(&command) {
                tracing::warn!("rollback failed on {}: {}", key.node, e);
            }
            p.in_block = false;
        }
        self.participants.clear();
    }
}

// ── Session transaction ──────────────────────────────────────────────

/// One transaction of a session, implicit or explicit.
pub struct Transaction {
    id: u64,
    session_id: u32,
    local_group: GroupId,
    explicit: bool,
    mode: TransactionExecutionMode,
    coordinated: CoordinatedTransaction,
}

impl Transaction {
    pub fn new(
        id: u64,
        session_id: u32,
        local_group: GroupId,
        explicit: bool,
        mode: TransactionExecutionMode,
        transport: Arc<dyn WorkerTransport>,
    ) -> Self {
        Self {
            id,
            session_id,
            local_group,
            explicit,
            mode,
            coordinated: CoordinatedTransaction::new(transport),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Opened with an explicit BEGIN.
    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    pub fn mode(&self) -> &TransactionExecutionMode {
        &self.mode
    }

    pub fn mode_mut(&mut self) -> &mut TransactionExecutionMode {
        &mut self.mode
    }

    pub fn coordinated(&mut self) -> &mut CoordinatedTransaction {
        &mut self.coordinated
    }

    pub fn transport(&self) -> Arc<dyn WorkerTransport> {
        Arc::clone(self.coordinated.transport())
    }

    /// Whether connections opened now should stay outside a transaction block.
    pub fn uses_bare_connections(&self) -> bool {
        self.mode.commit_protocol() == CommitProtocol::Bare
    }

    /// Run `command` on the per-node connection to `node`.
    pub fn execute_on_node(&mut self, node: &NodeKey, command: &str) -> TernResult<()> {
        let key = ConnectionKey::per_node(node.clone(), self.uses_bare_connections());
        self.coordinated.execute(&key, command)
    }

    /// Global transaction id prefix for prepared worker transactions.
    pub fn gid_prefix(&self) -> String {
        format!("tern_{}_{}_{}", self.local_group.0, self.session_id, self.id)
    }

    /// Worker side of commit that must precede the local commit.
    ///
    /// A bare protocol switch only affects connections opened after it, so
    /// blocks opened earlier are still committed with the protocol the
    /// transaction started with.
    pub fn prepare_commit(&mut self) -> TernResult<()> {
        let protocol = match self.mode.saved_commit_protocol {
            Some(saved) if self.mode.commit_protocol == CommitProtocol::Bare => saved,
            _ => self.mode.commit_protocol,
        };
        let prefix = self.gid_prefix();
        let result = self.coordinated.prepare_commit(protocol, &prefix);
        if result.is_err() {
            self.mode.reset();
        }
        result
    }

    /// Worker side of commit that follows the local commit.
    pub fn finish_commit(&mut self) {
        self.coordinated.finish_commit();
        self.mode.reset();
        tracing::debug!(txn = self.id, "coordinated transaction committed");
    }

    pub fn abort(&mut self) {
        self.coordinated.abort();
        self.mode.reset();
        tracing::debug!(txn = self.id, "coordinated transaction aborted");
    }
}
