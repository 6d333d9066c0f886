//! Source feed client
//!
//! Paginated order retrieval from the Trendyol supplier API. Two endpoint
//! generations exist in the wild — the `orders` listing and the
//! `shipment-packages` listing — returning the same order/customer/line
//! shape, so the client exposes a single [`TrendyolClient::list_orders`]
//! regardless of which family is configured.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::airtable::truncate_body;

/// Which listing endpoint family this deployment talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedEndpoint {
    Orders,
    ShipmentPackages,
}

impl FeedEndpoint {
    fn path_segment(&self) -> &'static str {
        match self {
            FeedEndpoint::Orders => "orders",
            FeedEndpoint::ShipmentPackages => "shipment-packages",
        }
    }
}

/// How credentials are attached to feed requests. Older endpoints take an
/// HTTP Basic header, newer generations take separate key/secret headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthStyle {
    Basic,
    Headers,
}

/// Failures talking to the source feed. Any of these aborts the current
/// sync pass; none of them should crash the process.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("feed request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid feed url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// One page of the order listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdersPage {
    #[serde(default)]
    pub content: Vec<Order>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub total_elements: u64,
}

impl OrdersPage {
    pub fn has_more(&self) -> bool {
        self.page + 1 < self.total_pages
    }
}

/// A raw order as the feed returns it. Every field is optional or defaulted;
/// validation happens in the sync engine, not during deserialization.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub customer_id: Option<i64>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub order_date: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub lines: Vec<LineItem>,
    #[serde(default)]
    pub shipment_address: Option<ShipmentAddress>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    #[serde(default, alias = "merchantSku")]
    pub sku: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    /// Kept as a JSON number so the decimal text survives untouched.
    #[serde(default)]
    pub price: Option<serde_json::Number>,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentAddress {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address1: Option<String>,
    #[serde(default)]
    pub address2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub full_address: Option<String>,
}

impl ShipmentAddress {
    /// Recipient name, preferring the preformatted field.
    pub fn display_name(&self) -> Option<String> {
        if let Some(name) = self.full_name.as_deref().filter(|s| !s.trim().is_empty()) {
            return Some(name.trim().to_string());
        }
        match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) => Some(format!("{} {}", first.trim(), last.trim())),
            (Some(first), None) => Some(first.trim().to_string()),
            (None, Some(last)) => Some(last.trim().to_string()),
            (None, None) => None,
        }
    }

    /// Single-line postal address assembled from whatever parts are present.
    pub fn postal_address(&self) -> Option<String> {
        if let Some(full) = self.full_address.as_deref().filter(|s| !s.trim().is_empty()) {
            return Some(full.trim().to_string());
        }
        let parts: Vec<&str> = [
            self.address1.as_deref(),
            self.address2.as_deref(),
            self.district.as_deref(),
            self.city.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

/// Client for one supplier's order feed.
#[derive(Debug, Clone)]
pub struct TrendyolClient {
    http: reqwest::Client,
    api_base: Url,
    seller_id: String,
    api_key: String,
    api_secret: String,
    endpoint: FeedEndpoint,
    auth_style: AuthStyle,
}

impl TrendyolClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api_base: &str,
        seller_id: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        endpoint: FeedEndpoint,
        auth_style: AuthStyle,
        timeout: Duration,
    ) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: Url::parse(api_base)?,
            seller_id: seller_id.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            endpoint,
            auth_style,
        })
    }

    fn listing_url(&self) -> Result<Url, FeedError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| FeedError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push("suppliers")
            .push(&self.seller_id)
            .push(self.endpoint.path_segment());
        Ok(url)
    }

    fn basic_credentials(&self) -> String {
        BASE64.encode(format!("{}:{}", self.api_key, self.api_secret))
    }

    /// Fetch one page of orders, optionally bounded below by a watermark
    /// (epoch milliseconds, inclusive).
    pub async fn list_orders(
        &self,
        page: u32,
        size: u32,
        since_ms: Option<i64>,
    ) -> Result<OrdersPage, FeedError> {
        let mut url = self.listing_url()?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("page", &page.to_string());
            pairs.append_pair("size", &size.to_string());
            if let Some(since) = since_ms {
                pairs.append_pair("startDate", &since.to_string());
            }
        }

        let mut request = self
            .http
            .get(url)
            .header(
                reqwest::header::USER_AGENT,
                format!("{} - SelfIntegration", self.seller_id),
            );
        request = match self.auth_style {
            AuthStyle::Basic => request.header(
                reqwest::header::AUTHORIZATION,
                format!("Basic {}", self.basic_credentials()),
            ),
            AuthStyle::Headers => request
                .header("x-supplier-api-key", &self.api_key)
                .header("x-supplier-api-secret", &self.api_secret),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Status {
                status: status.as_u16(),
                body: truncate_body(body),
            });
        }

        let orders: OrdersPage = response.json().await?;
        debug!(
            page,
            orders = orders.content.len(),
            total_pages = orders.total_pages,
            "feed page fetched"
        );
        Ok(orders)
    }
}
