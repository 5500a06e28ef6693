use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use membership_core::config::ReconcilerConfig;
use membership_core::Connector;
use membership_kube::cli::Args;
use membership_kube::{KubeLeaderElectionExecutor, KubeMembershipExecutor};
use tokio_stream::StreamExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    membership_common::logging::init();

    let args = Args::parse();
    let member_id = args.resolve_member_id();
    let client = kube::Client::try_default().await?;

    let membership_executor = Arc::new(KubeMembershipExecutor::new(client.clone(), &args.namespace));
    let leader_election_executor = Arc::new(KubeLeaderElectionExecutor::new(
        client,
        &args.namespace,
        &args.lease_name,
        Duration::from_secs(args.lease_ttl_secs),
        Duration::from_secs(args.lease_renew_secs),
    ));

    let config = ReconcilerConfig::with_stale_threshold(args.stale_threshold_ms);
    let connector = Connector::builder(member_id)
        .config(config)
        .build(membership_executor, leader_election_executor)?;

    connector.register(|m| {
        membership_types::MemberRevision::new(m, 1, 0)
    }).await?;
    connector.join_leadership_group().await?;

    tracing::info!("membership connector started");

    let mut changes = Box::pin(connector.membership_change_events());
    let shutdown = tokio_util::sync::CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        membership_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            update = changes.next() => {
                let Some(update) = update else { break };
                for delta in update.delta_events {
                    tracing::info!(?delta, "cluster state changed");
                }
            }
        }
    }

    connector.shutdown().await;
    Ok(())
}
