//! Record source: the public streets dataset.
//!
//! The dataset is served by a CKAN `datastore_search` endpoint. Records are
//! fetched page by page; the first page carries the total number of matches,
//! which bounds the number of further requests.

use crate::config::SourceConfig;
use crate::record::{City, Street};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

#[async_trait]
pub trait RecordSource: Send + Sync + 'static {
    /// Every street of `city`. An empty result is not an error.
    async fn streets_in_city(&self, city: City) -> Result<Vec<Street>>;

    /// Full field set of a single street.
    async fn street_by_id(&self, street_id: i64) -> Result<Street>;
}

/// A street as the dataset returns it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiStreet {
    #[serde(rename = "_id")]
    pub id: i64,
    pub region_code: i32,
    pub region_name: String,
    pub city_code: i32,
    pub city_name: String,
    pub street_code: i32,
    pub street_name: String,
    pub street_name_status: String,
    pub official_code: i64,
}

impl From<ApiStreet> for Street {
    fn from(api: ApiStreet) -> Self {
        let city_name = match City::from_source_name(&api.city_name) {
            Some(city) => city.display_name().to_string(),
            None => api.city_name.trim().to_string(),
        };

        Street {
            street_id: api.id,
            region_code: api.region_code,
            region_name: api.region_name.trim().to_string(),
            city_code: api.city_code,
            city_name,
            street_code: api.street_code,
            street_name: api.street_name.trim().to_string(),
            street_name_status: api.street_name_status,
            official_code: api.official_code,
        }
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<ApiStreet>,
    /// Number of matches across all pages, when the server reports it.
    pub total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    success: Option<bool>,
    result: SearchResult,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    records: Vec<ApiStreet>,
    #[serde(default)]
    total: Option<u64>,
}

/// Collects every page returned by `fetch_page(offset)`.
///
/// - The total is read from the first page; without it only the first page
///   is kept.
/// - An empty page ends the scan.
/// - No more than `max_pages` requests are made.
/// - Zero records with a total of zero is an empty result, zero records with
///   a positive total is an error.
pub async fn paginate<F, Fut>(page_size: u64, max_pages: u64, mut fetch_page: F) -> Result<Vec<ApiStreet>>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<Page>>,
{
    let mut collected: Vec<ApiStreet> = Vec::new();
    let mut offset = 0;
    let mut total = 0;
    let mut pages = 0;

    while pages < max_pages {
        let page = fetch_page(offset).await?;
        pages += 1;

        if pages == 1 {
            match page.total {
                Some(reported) => {
                    total = reported;
                    info!(total, "Fetching streets");
                }
                None => {
                    warn!("Total count not available in response, keeping only the first page");
                    collected.extend(page.records);
                    break;
                }
            }
        }

        if page.records.is_empty() {
            break;
        }

        collected.extend(page.records);
        debug!(
            fetched = collected.len(),
            offset, "Fetched page of streets"
        );

        offset += page_size;
        if collected.len() as u64 >= total {
            break;
        }
    }

    if pages >= max_pages && (collected.len() as u64) < total {
        warn!(
            max_pages,
            fetched = collected.len(),
            total,
            "Page limit reached, data may be incomplete"
        );
    }

    if collected.is_empty() && total > 0 {
        error!(total, "No streets fetched despite a positive total");
        return Err(Error::Source(format!(
            "fetched no streets although {} were reported",
            total
        )));
    }

    Ok(collected)
}

/// [`RecordSource`] backed by the data.gov.il datastore API.
pub struct DataGovSource {
    client: reqwest::Client,
    config: SourceConfig,
}

impl DataGovSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    async fn search(&self, filters: serde_json::Value, limit: u64, offset: u64) -> Result<Page> {
        let body = json!({
            "resource_id": self.config.resource_id,
            "filters": filters,
            "limit": limit,
            "offset": offset,
            "include_total": true,
        });

        let response: SearchResponse = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.success == Some(false) {
            return Err(Error::Source("datastore_search reported failure".to_string()));
        }

        Ok(Page {
            records: response.result.records,
            total: response.result.total,
        })
    }
}

#[async_trait]
impl RecordSource for DataGovSource {
    #[instrument(skip_all, fields(city = %city))]
    async fn streets_in_city(&self, city: City) -> Result<Vec<Street>> {
        let filters = json!({ "city_name": city.source_name() });
        let page_size = self.config.page_size;

        let records = paginate(page_size, self.config.max_pages, |offset| {
            self.search(filters.clone(), page_size, offset)
        })
        .await?;

        Ok(records.into_iter().map(Street::from).collect())
    }

    async fn street_by_id(&self, street_id: i64) -> Result<Street> {
        let page = self.search(json!({ "_id": street_id }), 1, 0).await?;
        page.records
            .into_iter()
            .next()
            .map(Street::from)
            .ok_or_else(|| Error::Source(format!("No street found for id: {}", street_id)))
    }
}
