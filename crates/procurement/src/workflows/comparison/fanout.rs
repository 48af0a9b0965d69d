use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::domain::{NotificationId, VendorId};
use super::repository::{NotificationDispatcher, OutboundMessage};

/// One vendor notification waiting to go out. `message` is `None` when the vendor
/// has no address on file; that delivery fails without reaching the dispatcher.
#[derive(Debug, Clone)]
pub(crate) struct PendingDelivery {
    pub notification_id: NotificationId,
    pub vendor_id: VendorId,
    pub message: Option<OutboundMessage>,
}

#[derive(Debug, Clone)]
pub(crate) struct DeliveryReport {
    pub notification_id: NotificationId,
    pub vendor_id: VendorId,
    pub result: Result<(), String>,
}

impl DeliveryReport {
    pub fn delivered(&self) -> bool {
        self.result.is_ok()
    }
}

/// Dispatch every delivery as its own task, at most `concurrency` in flight.
///
/// Reports come back in input order, one per delivery, whatever each task did.
pub(crate) async fn dispatch_all(
    dispatcher: Arc<dyn NotificationDispatcher>,
    deliveries: Vec<PendingDelivery>,
    concurrency: usize,
) -> Vec<DeliveryReport> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut reports: Vec<DeliveryReport> = deliveries
        .iter()
        .map(|delivery| DeliveryReport {
            notification_id: delivery.notification_id.clone(),
            vendor_id: delivery.vendor_id.clone(),
            result: Err("dispatch task aborted".to_string()),
        })
        .collect();

    let mut tasks = JoinSet::new();
    for (index, delivery) in deliveries.into_iter().enumerate() {
        let Some(message) = delivery.message else {
            reports[index].result = Err("vendor has no email address".to_string());
            continue;
        };
        let dispatcher = Arc::clone(&dispatcher);
        let permits = Arc::clone(&permits);
        tasks.spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => dispatcher
                    .dispatch(message)
                    .await
                    .map_err(|err| err.to_string()),
                Err(_) => Err("dispatch pool closed".to_string()),
            };
            (index, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Ok((index, result)) = joined {
            reports[index].result = result;
        }
    }

    reports
}
