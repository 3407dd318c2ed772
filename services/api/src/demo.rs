use crate::infra::{build_loan_service, parse_date};
use chrono::{Duration, Local, NaiveDate};
use clap::Args;
use loan_desk::config::WorkflowConfig;
use loan_desk::error::AppError;
use loan_desk::workflows::loans::{
    Actor, AllocationPlan, AvailabilityDeclaration, BuildingAllocation, BuildingId,
    EquipmentId, ItemAllocation, NewLoanRequest, RequestItemId, RequestedEquipment,
    ResponseSubmission,
};

const ENGINEERING: &str = "bld-engineering";
const HUMANITIES: &str = "bld-humanities";

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// First day of the loan (YYYY-MM-DD). Defaults to one week from today.
    #[arg(long, value_parser = parse_date)]
    pub(crate) start_date: Option<NaiveDate>,
    /// Number of loan days including the first.
    #[arg(long, default_value_t = 2)]
    pub(crate) days: u32,
    /// Venue printed on the request.
    #[arg(long, default_value = "Main auditorium")]
    pub(crate) venue: String,
    /// Leave out the rendered notifications at the end of the walkthrough.
    #[arg(long)]
    pub(crate) hide_outbox: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        start_date,
        days,
        venue,
        hide_outbox,
    } = args;

    let start_date = start_date.unwrap_or_else(|| Local::now().date_naive() + Duration::days(7));
    let end_date = start_date + Duration::days(i64::from(days.max(1)) - 1);

    let wiring = build_loan_service(&WorkflowConfig::default())?;
    let service = wiring.service;
    let applicant = Actor::applicant("student-0142", "Arisa");
    let staff = Actor::academic_staff("staff-007", "Dr. Somchai");

    println!("Equipment loan demo");
    let created = service.create_request(
        &applicant,
        NewLoanRequest {
            start_date,
            end_date,
            venue,
            purpose: "Orientation week concert".to_string(),
            items: vec![
                RequestedEquipment {
                    equipment_id: EquipmentId::from("eq-speaker"),
                    quantity: 5,
                },
                RequestedEquipment {
                    equipment_id: EquipmentId::from("eq-microphone"),
                    quantity: 3,
                },
            ],
        },
    )?;
    let request_id = created.request_id;
    println!(
        "1. {} filed request {} ({} to {}) -> {}",
        applicant.name, request_id, start_date, end_date, created.status
    );

    let inquiry = service.approve_inquiry(&staff, &request_id).await?;
    println!(
        "2. {} opened the building inquiry -> {}",
        staff.name, inquiry.status
    );
    println!(
        "   form link {} (expires {})",
        service.form_url(&inquiry.token.token),
        inquiry.token.expires_at.format("%Y-%m-%d %H:%M UTC")
    );

    let detail = service.request_detail(&staff, &request_id)?;
    let items: Vec<RequestItemId> = detail.items.iter().map(|item| item.item_id.clone()).collect();
    let [speakers, microphones] = items.as_slice() else {
        println!("   unexpected item count {}", items.len());
        return Ok(());
    };

    let token = inquiry.token.token.as_str();
    let first = service.submit_response(
        token,
        declaration(ENGINEERING, &[(speakers, 3), (microphones, 3)]),
        Some("10.20.0.15".to_string()),
    )?;
    println!(
        "3. {} can lend 3 speakers and 3 microphones -> {}",
        first.building_id, first.status
    );
    let second = service.submit_response(
        token,
        declaration(HUMANITIES, &[(speakers, 2), (microphones, 0)]),
        Some("10.20.4.31".to_string()),
    )?;
    println!(
        "4. {} can lend 2 speakers -> {}",
        second.building_id, second.status
    );

    let aggregate = service.building_responses(&staff, &request_id)?;
    println!("5. Availability across {} buildings:", aggregate.responses.len());
    for total in &aggregate.totals {
        println!(
            "   - {}: requested {} | offered {}",
            total.equipment_name, total.requested_quantity, total.total_available
        );
    }

    let plan = AllocationPlan {
        allocations: vec![
            ItemAllocation {
                item_id: speakers.clone(),
                approved_quantity: 5,
                building_allocations: vec![share(ENGINEERING, 3), share(HUMANITIES, 2)],
            },
            ItemAllocation {
                item_id: microphones.clone(),
                approved_quantity: 3,
                building_allocations: vec![share(ENGINEERING, 3)],
            },
        ],
        notes: Some("Pick up from the loading dock".to_string()),
    };
    let outcome = service.allocate(&staff, &request_id, plan).await?;
    println!(
        "6. Allocated {} building shares -> {}",
        outcome.allocations_written, outcome.status
    );
    match (&outcome.document, &outcome.warning) {
        (Some(document), _) => println!("   document stored at {document}"),
        (None, Some(warning)) => println!("   {warning}"),
        (None, None) => {}
    }

    let summary = service.allocation_summary(&applicant, &request_id)?;
    println!("7. Summary seen by the applicant:");
    for item in &summary.items {
        let shares: Vec<String> = item
            .allocations
            .iter()
            .map(|allocation| format!("{} x{}", allocation.building_name, allocation.allocated_quantity))
            .collect();
        println!(
            "   - {}: approved {} of {} ({})",
            item.equipment_name,
            item.approved_quantity.unwrap_or(0),
            item.requested_quantity,
            shares.join(", ")
        );
    }

    if hide_outbox {
        return Ok(());
    }

    println!("\nNotifications");
    for (recipient, message) in wiring.sink.outbox() {
        println!("- to {recipient}: {}", message.subject);
    }

    Ok(())
}

fn declaration(building: &str, quantities: &[(&RequestItemId, u32)]) -> ResponseSubmission {
    ResponseSubmission {
        building_id: BuildingId::from(building),
        items: quantities
            .iter()
            .map(|(item_id, available_quantity)| AvailabilityDeclaration {
                item_id: (*item_id).clone(),
                available_quantity: *available_quantity,
            })
            .collect(),
    }
}

fn share(building: &str, allocated_quantity: u32) -> BuildingAllocation {
    BuildingAllocation {
        building_id: BuildingId::from(building),
        allocated_quantity,
    }
}
