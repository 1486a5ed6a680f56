//! Counters for tenancy and membership events
//!
//! Recording goes through the `metrics` facade; installing a recorder or
//! exporter is up to the host application. Without one, every call is a no-op.

use metrics::{counter, describe_counter};

pub const CONTEXT_RESOLVED: &str = "workspaces.context.resolved";
pub const CONTEXT_UNRESOLVED: &str = "workspaces.context.unresolved";
pub const SWITCH_TOTAL: &str = "workspaces.switch.total";
pub const SWITCH_REJECTED: &str = "workspaces.switch.rejected";
pub const SCOPE_DENIED: &str = "workspaces.scope.denied";
pub const INVARIANT_VIOLATIONS: &str = "workspaces.invariant.violations";
pub const INVITATIONS_CREATED: &str = "workspaces.invitations.created";
pub const INVITATIONS_ACCEPTED: &str = "workspaces.invitations.accepted";
pub const INVITATIONS_DECLINED: &str = "workspaces.invitations.declined";
pub const INVITATIONS_CANCELLED: &str = "workspaces.invitations.cancelled";
pub const INVITATIONS_PRUNED: &str = "workspaces.invitations.pruned";

/// Register metric descriptions with the installed recorder
pub fn init_metrics() {
    describe_counter!(CONTEXT_RESOLVED, "Requests whose current workspace was resolved, by resolver");
    describe_counter!(CONTEXT_UNRESOLVED, "Requests where no resolver produced a workspace");
    describe_counter!(SWITCH_TOTAL, "Successful current-workspace switches");
    describe_counter!(SWITCH_REJECTED, "Switches refused because the user is not a member");
    describe_counter!(SCOPE_DENIED, "Scoped queries issued without a current workspace");
    describe_counter!(INVARIANT_VIOLATIONS, "Current-membership invariant violations detected");
    describe_counter!(INVITATIONS_CREATED, "Invitations issued");
    describe_counter!(INVITATIONS_ACCEPTED, "Invitations accepted");
    describe_counter!(INVITATIONS_DECLINED, "Invitations declined");
    describe_counter!(INVITATIONS_CANCELLED, "Invitations cancelled");
    describe_counter!(INVITATIONS_PRUNED, "Invitations removed by pruning");
}

/// Increment a counter by one
pub fn record(name: &'static str) {
    counter!(name).increment(1);
}

/// Increment a counter by `value`
pub fn record_n(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Count a resolution, labelled with the resolver that produced it
pub fn record_resolved(resolver: &'static str) {
    counter!(CONTEXT_RESOLVED, "resolver" => resolver).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        init_metrics();
        record(SWITCH_TOTAL);
        record_n(INVITATIONS_PRUNED, 3);
        record_resolved("header");
    }
}
