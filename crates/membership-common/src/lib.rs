pub mod logging;
pub mod shutdown;
pub mod wait;

/// Annotation keys stamped on substrate objects created by this connector.
pub mod annotations {
    pub const MANAGED_BY: &str = "membership.eosin.io/managed-by";
    pub const MEMBER_ID: &str = "membership.eosin.io/member-id";
    pub const REVISION: &str = "membership.eosin.io/revision";
}
