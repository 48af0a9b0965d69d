use super::common::*;
use chrono::Duration;

use crate::workflows::comparison::domain::{
    NegotiationState, RequisitionId, RequisitionStatus, SessionId, TriggerReason,
};
use crate::workflows::comparison::repository::RepositoryError;
use crate::workflows::comparison::tracker::{CompletionTracker, VendorProgress};

#[test]
fn deadline_with_one_completed_vendor_triggers_deadline_reached() {
    let requisition = overdue_requisition();
    let sessions = vec![
        session(VENDORS[0], NegotiationState::Accepted, Some(45_000)),
        session(VENDORS[1], NegotiationState::Negotiating, Some(50_000)),
    ];

    let status = CompletionTracker::assess(&requisition, &sessions, false, now());

    assert_eq!(status.total_vendors, 3);
    assert_eq!(status.completed_vendors, 1);
    assert_eq!(status.pending_vendors, 2);
    assert!(!status.all_completed);
    assert!(status.deadline_passed);
    assert!(status.should_trigger());
    assert_eq!(status.trigger, Some(TriggerReason::DeadlineReached));
}

#[test]
fn all_completed_fires_once_and_never_after_a_report() {
    let requisition = requisition();
    let sessions: Vec<_> = VENDORS
        .iter()
        .map(|vendor| session(vendor, NegotiationState::Accepted, Some(45_000)))
        .collect();

    let fresh = CompletionTracker::assess(&requisition, &sessions, false, now());
    assert!(fresh.all_completed);
    assert!(!fresh.deadline_passed);
    assert_eq!(fresh.trigger, Some(TriggerReason::AllCompleted));

    let reported = CompletionTracker::assess(&requisition, &sessions, true, now());
    assert!(reported.all_completed);
    assert_eq!(reported.trigger, None);
}

#[test]
fn unresolved_escalation_blocks_completion() {
    let requisition = requisition();
    let mut escalated = session(VENDORS[2], NegotiationState::Escalated, Some(47_000));
    escalated.utility_score = None;
    let sessions = vec![
        session(VENDORS[0], NegotiationState::Accepted, Some(45_000)),
        session(VENDORS[1], NegotiationState::Accepted, Some(46_000)),
        escalated.clone(),
    ];

    let status = CompletionTracker::assess(&requisition, &sessions, false, now());
    assert_eq!(status.pending_vendors, 1);
    assert!(!status.all_completed);
    assert_eq!(status.trigger, None);

    escalated.utility_score = Some(0.6);
    let resolved = vec![sessions[0].clone(), sessions[1].clone(), escalated];
    let status = CompletionTracker::assess(&requisition, &resolved, false, now());
    assert!(status.all_completed);
    assert_eq!(status.completed_vendors, 3);
}

#[test]
fn walked_away_vendors_are_excluded_not_pending() {
    let requisition = requisition();
    let sessions = vec![
        session(VENDORS[0], NegotiationState::Accepted, Some(45_000)),
        session(VENDORS[1], NegotiationState::WalkedAway, None),
        session(VENDORS[2], NegotiationState::WalkedAway, Some(70_000)),
    ];

    let status = CompletionTracker::assess(&requisition, &sessions, false, now());
    assert_eq!(status.excluded_vendors, 2);
    assert!(status.all_completed);
    assert_eq!(status.trigger, Some(TriggerReason::AllCompleted));
    assert_eq!(status.vendors[1].progress, VendorProgress::Excluded);
}

#[test]
fn nothing_fires_when_every_vendor_walked_away() {
    let requisition = overdue_requisition();
    let sessions: Vec<_> = VENDORS
        .iter()
        .map(|vendor| session(vendor, NegotiationState::WalkedAway, None))
        .collect();

    let status = CompletionTracker::assess(&requisition, &sessions, false, now());
    assert!(status.all_completed);
    assert!(status.deadline_passed);
    assert_eq!(status.completed_vendors, 0);
    assert!(!status.should_trigger());
}

#[test]
fn latest_session_per_vendor_wins_and_uninvited_vendors_are_ignored() {
    let requisition = requisition();
    let mut stale = session(VENDORS[0], NegotiationState::Accepted, Some(45_000));
    stale.id = SessionId::from("ses-old");
    stale.updated_at = now() - Duration::days(2);
    let current = session(VENDORS[0], NegotiationState::Negotiating, Some(44_000));
    let outsider = session("v-uninvited", NegotiationState::Accepted, Some(10_000));

    let status = CompletionTracker::assess(&requisition, &[current, stale, outsider], false, now());

    assert_eq!(status.total_vendors, 3);
    assert_eq!(status.completed_vendors, 0);
    assert_eq!(
        status.vendors[0].negotiation_state,
        Some(NegotiationState::Negotiating)
    );
}

#[test]
fn closed_requisitions_never_trigger() {
    let mut requisition = overdue_requisition();
    requisition.status = RequisitionStatus::Awarded;
    let sessions = vec![session(VENDORS[0], NegotiationState::Accepted, Some(45_000))];

    let status = CompletionTracker::assess(&requisition, &sessions, false, now());
    assert_eq!(status.completed_vendors, 1);
    assert_eq!(status.trigger, None);
}

#[tokio::test]
async fn evaluate_reports_missing_requisitions() {
    let store = seeded_store(requisition());

    let result =
        CompletionTracker::evaluate(store.as_ref(), &RequisitionId::from("req-missing"), now())
            .await;

    assert!(matches!(result, Err(RepositoryError::NotFound)));
}
