//! Configuration assembly and execution

use anyhow::Result;
use isolate_core::RlimitTable;
use isolate_namespace::{IdMapping, IsolationConfig, NamespaceFlags, executor};
use isolate_security::CallerIdentity;
use tracing::debug;

use crate::cli::Cli;
use crate::environ;

/// Build the configuration from `cli` and run the command
///
/// Directives are validated before the caller is looked up, and both happen
/// before any process is forked.
pub fn execute(cli: Cli) -> Result<i32> {
    let namespaces = cli
        .unshare
        .iter()
        .fold(NamespaceFlags::NONE, |flags, list| flags | NamespaceFlags::parse(list));

    let uid_map = parse_mappings(&cli.uid_map)?;
    let gid_map = parse_mappings(&cli.gid_map)?;

    let mut rlimits = RlimitTable::new();
    for list in &cli.rlimit {
        rlimits.parse(list)?;
    }

    let environment = cli.environ.as_deref().map(environ::load).transpose()?;

    let caller = CallerIdentity::resolve()?;
    debug!(user = caller.username(), uid = caller.uid(), gid = caller.gid(), "caller");

    let mut builder = IsolationConfig::builder(caller, cli.command)
        .with_namespaces(namespaces)
        .with_uid_map(uid_map)
        .with_gid_map(gid_map)
        .with_rlimits(rlimits);

    if let Some(root) = cli.root {
        builder = builder.with_root(root);
    }
    if let Some(uid) = cli.uid {
        builder = builder.with_uid(uid);
    }
    if let Some(gid) = cli.gid {
        builder = builder.with_gid(gid);
    }
    if let Some(environment) = environment {
        builder = builder.with_environment(environment);
    }

    let config = builder.build()?;
    debug!(?config, "configuration");

    Ok(executor::execute(&config)?)
}

fn parse_mappings(records: &[String]) -> isolate_core::Result<IdMapping> {
    let mut mapping = IdMapping::new();
    for record in records {
        mapping.parse_append(record)?;
    }
    Ok(mapping)
}
