use crate::config::CleanseConfig;
use crate::issue_store::{IssueCommandService, RecordIssueCommand};
use crate::operations::OperationStore;
use crate::queries::CtsSamQueryService;
use crate::rules::{self, cts_sam_rules, RulePair};
use crate::CleanseError;
use models::{Cph, CtsCphHoldingView, IssueContext, Lid, SamCphHoldingView};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Mutable state threaded through both pump passes.
#[derive(Clone, Debug, Default)]
pub struct PumpContext {
    pub operation_id: Uuid,
    pub records_analyzed: u64,
    pub total_records: u64,
    pub issues_found: u64,
}

/// Sequentially pumps the CTS holdings, then the SAM holdings, through
/// the rule set. Every live CTS row with an in-range county and every
/// live SAM row is observed exactly once per run.
pub struct CleanseEngine {
    queries: CtsSamQueryService,
    issues: IssueCommandService,
    operations: OperationStore,
    config: CleanseConfig,
}

impl CleanseEngine {
    pub fn new(
        queries: CtsSamQueryService,
        issues: IssueCommandService,
        operations: OperationStore,
        config: CleanseConfig,
    ) -> CleanseEngine {
        CleanseEngine {
            queries,
            issues,
            operations,
            config,
        }
    }

    #[tracing::instrument(skip(self, cancel), fields(operation_id = %operation_id))]
    pub async fn execute(
        &self,
        operation_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<PumpContext, CleanseError> {
        let mut ctx = PumpContext {
            operation_id,
            total_records: self.queries.count_cts_holdings().await?
                + self.queries.count_sam_holdings().await?,
            ..Default::default()
        };
        self.report_progress(&ctx).await?;

        self.pump_cts(&mut ctx, cancel).await?;
        self.pump_sam(&mut ctx, cancel).await?;

        self.report_progress(&ctx).await?;
        tracing::info!(
            analyzed = ctx.records_analyzed,
            issues = ctx.issues_found,
            "analysis scan finished",
        );
        Ok(ctx)
    }

    async fn pump_cts(
        &self,
        ctx: &mut PumpContext,
        cancel: &CancellationToken,
    ) -> Result<(), CleanseError> {
        let mut skip = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(CleanseError::Cancelled);
            }
            let page = self.queries.cts_identifier_page(skip).await?;
            if page.is_empty() {
                return Ok(());
            }
            skip += page.len();

            for raw in &page {
                self.observe(ctx).await?;
                let lid = match Lid::parse(raw) {
                    Ok(lid) => lid,
                    Err(_) => {
                        tracing::debug!(identifier = %raw, "unparseable LID, skipping");
                        continue;
                    }
                };
                if !lid.in_cts_county_range() {
                    continue;
                }
                self.process_cts_primary(ctx, &lid).await?;
            }
        }
    }

    async fn pump_sam(
        &self,
        ctx: &mut PumpContext,
        cancel: &CancellationToken,
    ) -> Result<(), CleanseError> {
        let mut skip = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(CleanseError::Cancelled);
            }
            let page = self.queries.sam_identifier_page(skip).await?;
            if page.is_empty() {
                return Ok(());
            }
            skip += page.len();

            for raw in &page {
                self.observe(ctx).await?;
                let cph = match Cph::parse(raw) {
                    Ok(cph) => cph,
                    Err(_) => {
                        tracing::debug!(identifier = %raw, "unparseable CPH, skipping");
                        continue;
                    }
                };
                self.process_sam_primary(ctx, &cph).await?;
            }
        }
    }

    /// One CTS holding: require its SAM counterpart, then run the pair
    /// rules in priority order.
    async fn process_cts_primary(
        &self,
        ctx: &mut PumpContext,
        lid: &Lid,
    ) -> Result<(), CleanseError> {
        let Some(sam_doc) = self.queries.sam_holding_by_cph(&lid.cph).await? else {
            self.record(
                ctx,
                rules::ids::CTS_CPH_NOT_IN_SAM,
                lid.to_string(),
                IssueContext {
                    cph: Some(lid.cph.to_string()),
                    lid_full_identifier: Some(lid.to_string()),
                    detail: Some("no SAM holding for this CPH".to_string()),
                    ..Default::default()
                },
            )
            .await?;
            return Ok(());
        };

        let Some(cts_doc) = self.queries.cts_holding_by_lid(lid).await? else {
            // The identifier page and the holding fetch disagree; the row
            // was deleted mid-scan. Skip it.
            return Ok(());
        };

        let pair = RulePair {
            lid,
            cts: CtsCphHoldingView(&cts_doc),
            sam: SamCphHoldingView(&sam_doc),
        };
        for rule in cts_sam_rules() {
            if let Some(context) = rule.evaluate(&pair) {
                self.record(ctx, rule.id, lid.to_string(), context).await?;
            }
        }
        Ok(())
    }

    /// One SAM holding: require its CTS counterpart.
    async fn process_sam_primary(
        &self,
        ctx: &mut PumpContext,
        cph: &Cph,
    ) -> Result<(), CleanseError> {
        if self.queries.cts_holding_by_cph(cph).await?.is_none() {
            self.record(
                ctx,
                rules::ids::SAM_CPH_NOT_IN_CTS,
                cph.to_string(),
                IssueContext {
                    cph: Some(cph.to_string()),
                    detail: Some("no CTS holding for this CPH".to_string()),
                    ..Default::default()
                },
            )
            .await?;
        }
        Ok(())
    }

    async fn record(
        &self,
        ctx: &mut PumpContext,
        rule_id: &str,
        primary_record_id: String,
        context: IssueContext,
    ) -> Result<(), CleanseError> {
        self.issues
            .record_issue(
                RecordIssueCommand {
                    rule_id: rule_id.to_string(),
                    primary_record_id,
                    context,
                },
                ctx.operation_id,
            )
            .await?;
        ctx.issues_found += 1;
        Ok(())
    }

    async fn observe(&self, ctx: &mut PumpContext) -> Result<(), CleanseError> {
        ctx.records_analyzed += 1;
        if ctx.records_analyzed % self.config.progress_interval.max(1) == 0 {
            self.report_progress(ctx).await?;
        }
        Ok(())
    }

    async fn report_progress(&self, ctx: &PumpContext) -> Result<(), CleanseError> {
        self.operations
            .set_progress(
                ctx.operation_id,
                ctx.records_analyzed,
                ctx.total_records,
                ctx.issues_found,
            )
            .await
    }
}
