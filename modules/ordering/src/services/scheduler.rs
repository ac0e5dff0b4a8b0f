//! Periodic sweeps over assignments.

use crate::entities::delivery::{Delivery, ListExpiredAssignments, ListUnassignedDeliveries};
use crate::services::assignment::{AssignmentOutcome, AssignmentService};
use crate::services::load_order;
use framework::cron::{JobReport, OneGoScheduledJob, ScanAt, cron_one_go, is_due, run_clock};
use framework::now_time;
use kanau::processor::Processor;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, instrument};

/// Assignments nobody accepted within the acceptance timeout.
#[derive(Debug, Clone, Default)]
pub struct ExpiredAssignmentSweep(pub Vec<Delivery>);

impl OneGoScheduledJob for ExpiredAssignmentSweep {
    const NAME: &'static str = "expired_assignment_sweep";
    type Executor = AssignmentService;
    type Scanner = AssignmentService;

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Processor<ScanAt<ExpiredAssignmentSweep>> for AssignmentService {
    type Output = ExpiredAssignmentSweep;
    type Error = framework::Error;
    async fn process(
        &self,
        input: ScanAt<ExpiredAssignmentSweep>,
    ) -> Result<ExpiredAssignmentSweep, framework::Error> {
        let assigned_before = input.now - self.config.assignment.acceptance_timeout();
        let expired = self
            .db
            .process(ListExpiredAssignments { assigned_before })
            .await?;
        Ok(ExpiredAssignmentSweep(expired))
    }
}

impl Processor<ExpiredAssignmentSweep> for AssignmentService {
    type Output = JobReport;
    type Error = framework::Error;
    #[instrument(skip_all, err)]
    async fn process(&self, input: ExpiredAssignmentSweep) -> Result<JobReport, framework::Error> {
        let mut report = JobReport::default();
        for delivery in input.0 {
            let result = self.expire_assignment(&delivery, now_time()).await;
            report.record(&result);
        }
        Ok(report)
    }
}

/// Pending deliveries still waiting for a partner.
#[derive(Debug, Clone, Default)]
pub struct UnassignedRetrySweep(pub Vec<Delivery>);

impl OneGoScheduledJob for UnassignedRetrySweep {
    const NAME: &'static str = "unassigned_retry_sweep";
    type Executor = AssignmentService;
    type Scanner = AssignmentService;

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Processor<ScanAt<UnassignedRetrySweep>> for AssignmentService {
    type Output = UnassignedRetrySweep;
    type Error = framework::Error;
    async fn process(
        &self,
        _input: ScanAt<UnassignedRetrySweep>,
    ) -> Result<UnassignedRetrySweep, framework::Error> {
        let pending = self
            .db
            .process(ListUnassignedDeliveries {
                limit: self.config.assignment.retry_batch_size,
            })
            .await?;
        Ok(UnassignedRetrySweep(pending))
    }
}

impl Processor<UnassignedRetrySweep> for AssignmentService {
    type Output = JobReport;
    type Error = framework::Error;
    #[instrument(skip_all, err)]
    async fn process(&self, input: UnassignedRetrySweep) -> Result<JobReport, framework::Error> {
        let mut report = JobReport::default();
        for delivery in input.0 {
            let result = match load_order(&self.db, delivery.order_id).await {
                Ok((order, _)) => self.match_partner(delivery, &order, None).await,
                Err(e) => Err(e),
            };
            report.record(&result);
            if matches!(result, Ok(AssignmentOutcome::NoPartnerAvailable { .. })) {
                // Later deliveries would find the same empty pool.
                break;
            }
        }
        Ok(report)
    }
}

async fn sweep<J: OneGoScheduledJob<Scanner = AssignmentService, Executor = AssignmentService>>(
    service: &AssignmentService,
    clock_loop: u64,
) {
    if !is_due::<J>(clock_loop) {
        return;
    }
    if let Err(e) = cron_one_go::<J>(service, service, now_time()).await {
        error!(job = J::NAME, "Sweep failed: {e}");
    }
}

/// Run both sweeps every `assignment.sweep_interval_secs` until `shutdown` fires.
pub async fn run_assignment_sweeps(service: AssignmentService, shutdown: watch::Receiver<bool>) {
    let period = Duration::from_secs(service.config.assignment.sweep_interval_secs.max(1));
    run_clock(period, shutdown, move |clock_loop| {
        let service = service.clone();
        async move {
            sweep::<ExpiredAssignmentSweep>(&service, clock_loop).await;
            sweep::<UnassignedRetrySweep>(&service, clock_loop).await;
        }
    })
    .await;
}
