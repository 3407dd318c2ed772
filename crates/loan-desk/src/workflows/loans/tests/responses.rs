use super::common::*;
use chrono::{Duration, Utc};

use crate::workflows::loans::{
    BuildingId, LoanStore, Operator, RequestItemId, RequestStatus, WorkflowError,
};

#[tokio::test]
async fn first_response_advances_and_later_ones_only_annotate() {
    let (service, store, _) = build_service();
    let (request_id, token, items) = open_inquiry(&service, &store).await;

    let first = service
        .submit_response(
            &token,
            declaration(SCIENCE, &[(&items[0], 3), (&items[1], 3)]),
            Some("10.0.0.8".to_string()),
        )
        .expect("first response");
    assert_eq!(first.status, RequestStatus::PendingAllocation);
    assert!(!first.resubmitted);

    let second = service
        .submit_response(&token, declaration(ARTS, &[(&items[0], 2)]), None)
        .expect("second response");
    assert_eq!(second.status, RequestStatus::PendingAllocation);

    let history = store
        .read(|tables| tables.history_for(&request_id).cloned().collect::<Vec<_>>())
        .expect("read");
    let statuses: Vec<_> = history.iter().map(|entry| entry.status).collect();
    assert_eq!(
        statuses,
        vec![
            RequestStatus::PendingReview,
            RequestStatus::PendingBuildingResponse,
            RequestStatus::PendingAllocation,
            RequestStatus::PendingAllocation,
        ]
    );
    assert_eq!(
        history[2].operator,
        Operator::Building(BuildingId::from(SCIENCE))
    );
}

#[tokio::test]
async fn resubmission_replaces_items_for_the_same_building() {
    let (service, store, _) = build_service();
    let (request_id, token, items) = open_inquiry(&service, &store).await;

    service
        .submit_response(&token, declaration(SCIENCE, &[(&items[0], 5)]), None)
        .expect("first answer");
    let receipt = service
        .submit_response(
            &token,
            declaration(SCIENCE, &[(&items[0], 3), (&items[1], 2)]),
            Some("10.0.0.9".to_string()),
        )
        .expect("edited answer");
    assert!(receipt.resubmitted);

    let (responses, declared, ip) = store
        .read(|tables| {
            let responses: Vec<_> = tables.responses_for(&request_id).cloned().collect();
            let declared: Vec<(RequestItemId, u32)> = tables
                .response_items_of(&responses[0].id)
                .map(|item| (item.request_item_id.clone(), item.available_quantity))
                .collect();
            (responses.len(), declared, responses[0].ip_address.clone())
        })
        .expect("read");

    assert_eq!(responses, 1);
    assert_eq!(
        declared,
        vec![(items[0].clone(), 3), (items[1].clone(), 2)]
    );
    assert_eq!(ip.as_deref(), Some("10.0.0.9"));
}

#[tokio::test]
async fn first_submission_marks_token_used() {
    let (service, store, _) = build_service();
    let (_, token, items) = open_inquiry(&service, &store).await;

    service
        .submit_response(&token, declaration(ARTS, &[(&items[0], 1)]), None)
        .expect("answer");

    let used = store
        .read(|tables| tables.token_by_value(&token).map(|record| record.used))
        .expect("read");
    assert_eq!(used, Some(true));
}

#[tokio::test]
async fn submission_checks_building_items_and_duplicates() {
    let (service, store, _) = build_service();
    let (request_id, token, items) = open_inquiry(&service, &store).await;

    assert!(matches!(
        service.submit_response(&token, declaration(OLD_GYM, &[(&items[0], 1)]), None),
        Err(WorkflowError::NotFound {
            entity: "building",
            ..
        })
    ));
    let foreign = RequestItemId::from("not-on-this-request");
    assert!(matches!(
        service.submit_response(&token, declaration(SCIENCE, &[(&foreign, 1)]), None),
        Err(WorkflowError::NotFound {
            entity: "request item",
            ..
        })
    ));
    assert!(matches!(
        service.submit_response(&token, declaration(SCIENCE, &[]), None),
        Err(WorkflowError::Validation { .. })
    ));
    assert!(matches!(
        service.submit_response(
            &token,
            declaration(SCIENCE, &[(&items[0], 1), (&items[0], 2)]),
            None
        ),
        Err(WorkflowError::Validation { .. })
    ));

    let (responses, status) = store
        .read(|tables| {
            (
                tables.responses_for(&request_id).count(),
                tables.request(&request_id).map(|request| request.status),
            )
        })
        .expect("read");
    assert_eq!(responses, 0);
    assert_eq!(status, Some(RequestStatus::PendingBuildingResponse));
}

#[tokio::test]
async fn unknown_token_is_invalid() {
    let (service, _, _) = build_service();
    assert!(matches!(
        service.response_form("not-a-token", None),
        Err(WorkflowError::InvalidToken)
    ));
}

#[tokio::test]
async fn expired_token_rejects_form_and_submission() {
    let (service, store, _) = build_service();
    let (_, token, items) = open_inquiry(&service, &store).await;
    store
        .transaction(|tables| {
            if let Some(record) = tables.tokens.iter_mut().find(|record| record.token == token) {
                record.expires_at = Utc::now() - Duration::minutes(1);
            }
            Ok::<_, WorkflowError>(())
        })
        .expect("token backdated");

    assert!(matches!(
        service.response_form(&token, None),
        Err(WorkflowError::Expired)
    ));
    assert!(matches!(
        service.submit_response(&token, declaration(SCIENCE, &[(&items[0], 1)]), None),
        Err(WorkflowError::Expired)
    ));
}

#[tokio::test]
async fn form_preloads_the_editing_building() {
    let (service, store, _) = build_service();
    let (request_id, token, items) = open_inquiry(&service, &store).await;
    service
        .submit_response(&token, declaration(SCIENCE, &[(&items[0], 4)]), None)
        .expect("answer");

    let form = service
        .response_form(&token, Some(&BuildingId::from(SCIENCE)))
        .expect("form");
    assert_eq!(form.request_id, request_id);
    assert_eq!(form.venue, "Convention Hall");
    assert_eq!(form.items.len(), 2);
    assert_eq!(form.buildings.len(), 2, "only enabled buildings are listed");
    let preload = form.preload.expect("preloaded answer");
    assert_eq!(preload.items[0].available_quantity, 4);
    assert_eq!(form.submitted.len(), 1);

    let fresh = service
        .response_form(&token, Some(&BuildingId::from(ARTS)))
        .expect("form");
    assert!(fresh.preload.is_none());
}

#[tokio::test]
async fn form_is_closed_for_requests_outside_inquiry() {
    let (service, _, _) = build_service();
    let created = service
        .create_request(&applicant(), new_request())
        .expect("request created");
    let grant = service
        .issue_response_token(&staff(), &created.request_id)
        .expect("token issued");

    assert!(matches!(
        service.response_form(&grant.token, None),
        Err(WorkflowError::InvalidState {
            current: RequestStatus::PendingReview,
            ..
        })
    ));
}

#[tokio::test]
async fn aggregate_sums_availability_newest_first() {
    let (service, store, _) = build_service();
    let (request_id, _, items) = awaiting_allocation(&service, &store).await;

    let aggregate = service
        .building_responses(&staff(), &request_id)
        .expect("aggregate");
    assert_eq!(aggregate.responses.len(), 2);
    assert_eq!(aggregate.responses[0].building_name, "Arts Building");
    let totals: Vec<_> = aggregate
        .totals
        .iter()
        .map(|total| (total.item_id.clone(), total.total_available))
        .collect();
    assert_eq!(totals, vec![(items[0].clone(), 5), (items[1].clone(), 3)]);

    assert!(matches!(
        service.building_responses(&applicant(), &request_id),
        Err(WorkflowError::Forbidden(_))
    ));
}

#[tokio::test]
async fn aggregate_totals_do_not_overflow_quantity_range() {
    let (service, store, _) = build_service();
    let (request_id, token, items) = open_inquiry(&service, &store).await;
    service
        .submit_response(&token, declaration(SCIENCE, &[(&items[0], u32::MAX)]), None)
        .expect("science answers");
    service
        .submit_response(&token, declaration(ARTS, &[(&items[0], 1)]), None)
        .expect("arts answers");

    let aggregate = service
        .building_responses(&staff(), &request_id)
        .expect("aggregate");
    assert_eq!(aggregate.totals[0].total_available, u64::from(u32::MAX) + 1);
    assert!(service.request_detail(&staff(), &request_id).is_ok());
}
