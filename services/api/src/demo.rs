use crate::infra::{open_store, renderer, DemoFixture, LocalIssuer, LoggingDispatcher};
use chrono::{Duration, Utc};
use clap::Args;
use procurement::config::{AppConfig, ComparisonConfig};
use procurement::error::AppError;
use procurement::telemetry;
use async_trait::async_trait;
use procurement::workflows::comparison::{
    ComparisonService, DispatchError, NotificationDispatcher, OutboundMessage, RankedOffer,
    RequisitionId, SelectionChannel, SelectionRequest,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Directory for the rendered comparison report (defaults to ARTIFACT_DIR)
    #[arg(long)]
    pub(crate) artifact_dir: Option<PathBuf>,
    /// Award the offer at this rank instead of L1
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=3))]
    pub(crate) select_rank: u32,
}

#[derive(Args, Debug, Default)]
pub(crate) struct CheckDeadlinesArgs {
    /// SQLite database file (defaults to DATABASE_PATH)
    #[arg(long)]
    pub(crate) database: Option<PathBuf>,
}

pub(crate) async fn run_check_deadlines(args: CheckDeadlinesArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;
    if let Some(database) = args.database {
        config.comparison.database_path = Some(database);
    }
    telemetry::init(&config.telemetry, config.environment)?;

    let store = open_store(config.comparison.database_path.as_deref(), None)?;
    let service = ComparisonService::new(
        store,
        renderer(&config.comparison),
        Arc::new(LoggingDispatcher::default()),
        Arc::new(LocalIssuer::default()),
        &config.comparison,
    );

    let summary = service.check_deadlines(Utc::now()).await;
    let rendered = serde_json::to_string_pretty(&summary).map_err(std::io::Error::from)?;
    println!("{rendered}");
    Ok(())
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let mut config = ComparisonConfig::default();
    if let Some(dir) = args.artifact_dir {
        config.artifact_dir = dir;
    }

    let now = Utc::now();
    let fixture = DemoFixture::build(now);
    let store = open_store(None, Some(&fixture))?;
    let dispatcher = Arc::new(Outbox::default());
    let service = ComparisonService::new(
        store,
        renderer(&config),
        dispatcher.clone(),
        Arc::new(LocalIssuer::default()),
        &config,
    );
    let requisition_id = RequisitionId::from(DemoFixture::REQUISITION);

    println!("Vendor comparison demo");
    println!(
        "Requisition {}: {} x{} ({} vendors invited)",
        fixture.requisition.id,
        fixture.requisition.title,
        fixture.requisition.quantity,
        fixture.requisition.invited_vendors.len()
    );

    println!("\nNegotiation snapshots");
    for session in fixture.sessions {
        let vendor = session.vendor_id.clone();
        let recorded = service.record_negotiation(session, now).await?;
        let price = recorded
            .offer
            .as_ref()
            .map(|offer| offer.total_price.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("- {vendor}: offer {} at {price}", recorded.capture);
        if let Some(trigger) = recorded.trigger {
            println!("  all vendors completed, report trigger {}", trigger.label());
        }
    }

    let status = service.status(&requisition_id, now).await?;
    println!(
        "\nCompletion: {}/{} completed, {} excluded",
        status.completion.completed_vendors,
        status.completion.total_vendors,
        status.completion.excluded_vendors
    );
    if let Some(report) = &status.report {
        println!(
            "Report {} ({}), email {}",
            report.report_id,
            report.trigger.label(),
            report.email_status.label()
        );
    }

    let top = service
        .top(&requisition_id, service.default_top_n())
        .await?;
    println!("\nTop offers");
    for offer in &top.offers {
        print_ranked(offer);
    }

    let Some(choice) = top
        .offers
        .iter()
        .find(|offer| offer.rank == args.select_rank)
        .or_else(|| top.offers.first())
    else {
        println!("\nNo completed offers to award.");
        return Ok(());
    };

    let outcome = service
        .select(
            SelectionRequest {
                requisition_id: requisition_id.clone(),
                offer_id: choice.offer_id.clone(),
                acting_user: fixture.users[0].id.clone(),
                channel: SelectionChannel::Portal,
                reason: Some(format!("{} selected in demo", choice.label())),
            },
            now + Duration::minutes(5),
        )
        .await?;

    println!("\nAward");
    println!(
        "- {} wins with {} ({})",
        outcome.winning_vendor_id,
        choice.total_price,
        choice.label()
    );
    println!(
        "- purchase order: {}",
        outcome
            .purchase_order_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "pending manual creation".to_string())
    );
    println!(
        "- vendor notifications: {} sent, {} failed",
        outcome.notifications_sent, outcome.notifications_failed
    );

    println!("\nOutbox");
    for message in dispatcher.messages() {
        println!("- {} -> {}", message.template, message.recipient);
    }

    let artifact = service.report_artifact(&requisition_id).await?;
    println!(
        "\nReport artifact: {} bytes of {} under {}",
        artifact.bytes.len(),
        artifact.content_type,
        config.artifact_dir.display()
    );
    Ok(())
}

/// Logs like the server's dispatcher and keeps a copy for the demo printout.
#[derive(Default)]
struct Outbox {
    inner: LoggingDispatcher,
    messages: Mutex<Vec<OutboundMessage>>,
}

impl Outbox {
    fn messages(&self) -> Vec<OutboundMessage> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationDispatcher for Outbox {
    async fn dispatch(&self, message: OutboundMessage) -> Result<(), DispatchError> {
        self.inner.dispatch(message.clone()).await?;
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message);
        }
        Ok(())
    }
}

fn print_ranked(offer: &RankedOffer) {
    println!(
        "- {} {:<20} total {:>10} unit {:>8} {:<7} delivery {} score {:.1}",
        offer.label(),
        offer.vendor_name,
        offer.total_price,
        offer.unit_price,
        offer.payment_terms,
        offer
            .delivery_date
            .map(|date| date.to_string())
            .unwrap_or_else(|| "n/a".to_string()),
        offer.score
    );
}
