//! Rendering of the command strings sent to workers.
//!
//! Worker-side functions parse these strings, so the wrappers below must stay
//! byte-for-byte compatible with the worker extension.

use tern_common::types::{QualifiedName, ShardId};
use xxhash_rust::xxh3::xxh3_64;

/// Maximum identifier length in bytes (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Sent to metadata workers before a relayed command so they do not
/// re-propagate it.
pub const DISABLE_DDL_PROPAGATION: &str = "SET citus.enable_ddl_propagation TO 'off'";

const SHARD_NAME_SEPARATOR: char = '_';

const RESERVED_KEYWORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric",
    "authorization", "binary", "both", "case", "cast", "check", "collate", "collation",
    "column", "concurrently", "constraint", "create", "cross", "current_catalog",
    "current_date", "current_role", "current_schema", "current_time", "current_timestamp",
    "current_user", "default", "deferrable", "desc", "distinct", "do", "else", "end",
    "except", "false", "fetch", "for", "foreign", "freeze", "from", "full", "grant",
    "group", "having", "ilike", "in", "initially", "inner", "intersect", "into", "is",
    "isnull", "join", "lateral", "leading", "left", "like", "limit", "localtime",
    "localtimestamp", "natural", "not", "notnull", "null", "offset", "on", "only", "or",
    "order", "outer", "overlaps", "placing", "primary", "references", "returning", "right",
    "select", "session_user", "similar", "some", "symmetric", "table", "tablesample",
    "then", "to", "trailing", "true", "union", "unique", "user", "using", "variadic",
    "verbose", "when", "where", "window", "with",
];

/// Quote an identifier only when needed, doubling embedded double quotes.
pub fn quote_identifier(ident: &str) -> String {
    let mut chars = ident.chars();
    let safe_start = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    let safe = safe_start
        && ident
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$')
        && !RESERVED_KEYWORDS.contains(&ident);

    if safe {
        return ident.to_string();
    }
    let mut out = String::with_capacity(ident.len() + 2);
    out.push('"');
    for c in ident.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Quote a string literal. Embedded quotes are doubled; backslashes are
/// doubled and switch the literal to the `E''` form.
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 3);
    if value.contains('\\') {
        out.push('E');
    }
    out.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            out.push(c);
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// `schema.name`, each part quoted as needed.
pub fn qualified_relation_name(name: &QualifiedName) -> String {
    format!("{}.{}", quote_identifier(&name.schema), quote_identifier(&name.name))
}

/// Append `_{shard_id}` to a name. Names that would exceed the identifier
/// limit are clipped on a character boundary and disambiguated with a hash
/// of the full name.
pub fn extend_shard_name(name: &str, shard_id: ShardId) -> String {
    let suffix = format!("{}{}", SHARD_NAME_SEPARATOR, shard_id.0);
    if name.len() + suffix.len() <= MAX_IDENTIFIER_LEN {
        return format!("{}{}", name, suffix);
    }

    let hash = xxh3_64(name.as_bytes()) as u32;
    let budget = MAX_IDENTIFIER_LEN.saturating_sub(suffix.len() + 10);
    let mut clip = budget.min(name.len());
    while !name.is_char_boundary(clip) {
        clip -= 1;
    }
    format!("{}{}{:08x}{}", &name[..clip], SHARD_NAME_SEPARATOR, hash, suffix)
}

/// Wrapper that applies a DDL command to one shard.
pub fn shard_ddl_command(shard_id: ShardId, schema: &str, command: &str) -> String {
    format!(
        "SELECT worker_apply_shard_ddl_command ({}, {}, {})",
        shard_id.0,
        quote_literal(schema),
        quote_literal(command)
    )
}

/// Wrapper that applies a DDL command spanning two shards (foreign keys,
/// partition attach/detach).
pub fn inter_shard_ddl_command(
    left_shard: ShardId,
    left_schema: &str,
    right_shard: ShardId,
    right_schema: &str,
    command: &str,
) -> String {
    format!(
        "SELECT worker_apply_inter_shard_ddl_command ({}, {}, {}, {}, {})",
        left_shard.0,
        quote_literal(left_schema),
        right_shard.0,
        quote_literal(right_schema),
        quote_literal(command)
    )
}

/// Remote cluster-lock request. `qualified_name` is already identifier-quoted.
pub fn lock_relation_command(qualified_name: &str, lock_mode: &str) -> String {
    format!(
        "SELECT lock_relation_if_exists('{}', '{}');",
        qualified_name, lock_mode
    )
}

/// Reproduce the session search path on a worker. `None` when the session
/// uses the default path.
pub fn set_search_path_command(search_path: &[String]) -> Option<String> {
    if search_path.is_empty() {
        return None;
    }
    let schemas: Vec<String> = search_path.iter().map(|s| quote_identifier(s)).collect();
    Some(format!("SET search_path TO {};", schemas.join(",")))
}

pub fn detach_partition_command(parent: &QualifiedName, partition: &QualifiedName) -> String {
    format!(
        "ALTER TABLE IF EXISTS {} DETACH PARTITION {};",
        qualified_relation_name(parent),
        qualified_relation_name(partition)
    )
}
