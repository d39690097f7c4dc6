use crate::config::CleanseConfig;
use crate::CleanseError;
use doc_store::{DocumentStore, Filter, QueryParameters, TextMatch};
use models::{fields, Cph, Document, Lid};
use std::sync::Arc;

/// Read access to the CTS and SAM holding collections, shaped for the
/// engine: paged scans select only the identifier column; lookups fetch
/// whole documents.
#[derive(Clone)]
pub struct CtsSamQueryService {
    store: Arc<dyn DocumentStore>,
    config: CleanseConfig,
}

impl CtsSamQueryService {
    pub fn new(store: Arc<dyn DocumentStore>, config: CleanseConfig) -> CtsSamQueryService {
        CtsSamQueryService { store, config }
    }

    fn live() -> Filter {
        Filter::eq(fields::IS_DELETED, false)
    }

    pub async fn count_cts_holdings(&self) -> Result<u64, CleanseError> {
        let params = QueryParameters::count_only(&self.config.cts_collection, Self::live());
        Ok(self.store.query(&params).await?.total_count.unwrap_or(0))
    }

    pub async fn count_sam_holdings(&self) -> Result<u64, CleanseError> {
        let params = QueryParameters::count_only(&self.config.sam_collection, Self::live());
        Ok(self.store.query(&params).await?.total_count.unwrap_or(0))
    }

    /// One page of live CTS LID identifiers.
    pub async fn cts_identifier_page(&self, skip: usize) -> Result<Vec<String>, CleanseError> {
        let params = QueryParameters::new(&self.config.cts_collection)
            .with_filter(Self::live())
            .with_select([fields::LID_FULL_IDENTIFIER])
            .paged(skip, self.config.page_size);
        let result = self.store.query(&params).await?;
        Ok(result
            .data
            .iter()
            .map(|doc| models::str_field(doc, fields::LID_FULL_IDENTIFIER).to_string())
            .collect())
    }

    /// One page of live SAM CPH identifiers.
    pub async fn sam_identifier_page(&self, skip: usize) -> Result<Vec<String>, CleanseError> {
        let params = QueryParameters::new(&self.config.sam_collection)
            .with_filter(Self::live())
            .with_select([fields::CPH])
            .paged(skip, self.config.page_size);
        let result = self.store.query(&params).await?;
        Ok(result
            .data
            .iter()
            .map(|doc| models::str_field(doc, fields::CPH).to_string())
            .collect())
    }

    pub async fn sam_holding_by_cph(&self, cph: &Cph) -> Result<Option<Document>, CleanseError> {
        let params = QueryParameters::new(&self.config.sam_collection)
            .with_filter(Filter::and([
                Self::live(),
                Filter::eq(fields::CPH, cph.to_string()),
            ]))
            .paged(0, 1);
        Ok(self.store.query(&params).await?.data.into_iter().next())
    }

    pub async fn cts_holding_by_lid(&self, lid: &Lid) -> Result<Option<Document>, CleanseError> {
        let params = QueryParameters::new(&self.config.cts_collection)
            .with_filter(Filter::and([
                Self::live(),
                Filter::eq(fields::LID_FULL_IDENTIFIER, lid.to_string()),
            ]))
            .paged(0, 1);
        Ok(self.store.query(&params).await?.data.into_iter().next())
    }

    /// The CTS holding whose LID carries this CPH, regardless of region.
    pub async fn cts_holding_by_cph(&self, cph: &Cph) -> Result<Option<Document>, CleanseError> {
        let params = QueryParameters::new(&self.config.cts_collection)
            .with_filter(Filter::and([
                Self::live(),
                Filter::text(
                    TextMatch::EndsWith,
                    fields::LID_FULL_IDENTIFIER,
                    &format!("-{cph}"),
                    true,
                ),
            ]))
            .paged(0, 1);
        Ok(self.store.query(&params).await?.data.into_iter().next())
    }
}
