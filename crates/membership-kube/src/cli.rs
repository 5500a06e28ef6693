use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Namespace to read/write `MemberRecord` resources and the leadership
    /// `Lease` in.
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Name of the shared `Lease` object used for leader election.
    #[arg(long, env = "LEASE_NAME", default_value = "membership-connector")]
    pub lease_name: String,

    /// This process's member id. Falls back to the pod name, then hostname.
    #[arg(long, env = "MEMBER_ID")]
    pub member_id: Option<String>,

    /// How long a lease is considered valid without renewal.
    #[arg(long, env = "LEASE_TTL_SECS", default_value_t = 15)]
    pub lease_ttl_secs: u64,

    /// How often the local replica renews the lease while leading.
    #[arg(long, env = "LEASE_RENEW_SECS", default_value_t = 5)]
    pub lease_renew_secs: u64,

    /// Threshold above which a sibling's last heartbeat is considered
    /// stale and it drops out of `getSiblings()`.
    #[arg(long, env = "STALE_THRESHOLD_MS", default_value_t = 30_000)]
    pub stale_threshold_ms: i64,
}

impl Args {
    pub fn resolve_member_id(&self) -> String {
        self.member_id.clone().unwrap_or_else(|| {
            std::env::var("POD_NAME")
                .or_else(|_| std::env::var("HOSTNAME"))
                .unwrap_or_else(|_| format!("member-{}", std::process::id()))
        })
    }
}
