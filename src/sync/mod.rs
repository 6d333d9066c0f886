//! Reconciliation engine
//!
//! Drives one sync pass: fetch order pages from the feed since the
//! watermark, and for each order resolve-or-create the customer, resolve
//! inventory links, skip already-synced orders, and create the destination
//! row. A single order's failure never aborts the pass; a feed failure
//! aborts the pass with the watermark untouched.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

use crate::airtable::{AirtableClient, Formula, StoreError};
use crate::config::AppConfig;
use crate::status::map_status;
use crate::trendyol::{FeedError, Order, TrendyolClient};
use crate::watermark::WatermarkStore;

pub mod gate;

pub use gate::{SyncGate, SyncPermit};

// Destination field names. The store is schemaless from our side; these are
// the column labels the base was built with.
const FIELD_ORDER_ID: &str = "Order ID";
const FIELD_ORDER_NUMBER: &str = "Order Number";
const FIELD_CUSTOMER_LINK: &str = "Customer";
const FIELD_INVENTORY_LINK: &str = "Inventory";
const FIELD_ORDER_DATE: &str = "Order Date";
const FIELD_PAYMENT_STATUS: &str = "Payment Status";
const FIELD_SHIPPING_STATUS: &str = "Shipping Status";
const FIELD_SALES_CHANNEL: &str = "Sales Channel";
const FIELD_PRODUCT: &str = "Product";
const FIELD_QUANTITY: &str = "Quantity";
const FIELD_PRICE: &str = "Price";
const FIELD_CUSTOMER_ID: &str = "Customer ID";
const FIELD_CUSTOMER_NAME: &str = "Name";
const FIELD_CUSTOMER_PHONE: &str = "Phone";
const FIELD_CUSTOMER_ADDRESS: &str = "Address";
const FIELD_ACQUISITION_CHANNEL: &str = "Acquisition Channel";
const FIELD_SKU: &str = "SKU";

/// Pass-aborting failures. Everything per-order is handled inside the pass.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("source feed unavailable: {0}")]
    Feed(#[from] FeedError),
}

/// Why a single source order could not be turned into a destination row.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Malformed or incomplete source orders.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("order carries neither an id nor an order number")]
    MissingOrderId,
    #[error("order {external_id} has no order timestamp")]
    MissingTimestamp { external_id: String },
    #[error("order {external_id} has no customer id")]
    MissingCustomer { external_id: String },
}

/// A source order that passed validation.
#[derive(Debug, Clone)]
pub struct ValidOrder {
    pub external_id: String,
    pub order_number: String,
    pub customer_key: String,
    pub timestamp_ms: i64,
    pub status: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_address: Option<String>,
    pub lines: Vec<crate::trendyol::LineItem>,
}

impl ValidOrder {
    pub fn from_raw(order: Order) -> Result<Self, ValidationError> {
        let external_id = order
            .id
            .map(|id| id.to_string())
            .or_else(|| order.order_number.clone())
            .filter(|id| !id.is_empty())
            .ok_or(ValidationError::MissingOrderId)?;
        let order_number = order
            .order_number
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| external_id.clone());
        let timestamp_ms = order
            .order_date
            .ok_or_else(|| ValidationError::MissingTimestamp {
                external_id: external_id.clone(),
            })?;
        let customer_key = order
            .customer_id
            .map(|id| id.to_string())
            .ok_or_else(|| ValidationError::MissingCustomer {
                external_id: external_id.clone(),
            })?;

        let address = order.shipment_address.as_ref();
        Ok(Self {
            external_id,
            order_number,
            customer_key,
            timestamp_ms,
            status: order.status.clone(),
            customer_name: address.and_then(|a| a.display_name()),
            customer_phone: address.and_then(|a| a.phone.clone()),
            customer_address: address.and_then(|a| a.postal_address()),
            lines: order.lines,
        })
    }
}

/// What happened to one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderOutcome {
    Created,
    /// A destination row for this order id already exists.
    Duplicate,
}

/// Terminal report of one reconciliation pass.
#[derive(Debug, Default, Clone, Serialize, ToSchema)]
pub struct PassSummary {
    /// Feed pages fetched.
    pub pages: u32,
    /// Orders returned by the feed.
    pub seen: u32,
    /// Destination rows created.
    pub created: u32,
    /// Orders skipped because a row already existed.
    pub skipped: u32,
    /// Orders skipped because the store rejected a lookup or write.
    pub failed: u32,
    /// Orders skipped because the source payload was malformed.
    pub invalid: u32,
    /// Customer records created along the way.
    pub customers_created: u32,
    /// Line items that proceeded with an empty inventory link.
    pub inventory_misses: u32,
    /// Watermark after the pass, epoch milliseconds.
    pub watermark_ms: Option<i64>,
}

/// Destination table names, injected so tests can point the engine anywhere.
#[derive(Debug, Clone)]
pub struct Tables {
    pub orders: String,
    pub customers: String,
    pub inventory: String,
}

/// Per-pass knobs.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub page_size: u32,
    pub max_pages: u32,
    pub lookback_hours: u64,
    pub sales_channel: String,
    /// Configured seed watermark, used until a pass persists a real one.
    pub initial_watermark_ms: Option<i64>,
}

/// The reconciliation engine. Stateless between passes except for the
/// persisted watermark.
pub struct SyncEngine {
    feed: TrendyolClient,
    store: AirtableClient,
    watermark: WatermarkStore,
    tables: Tables,
    options: EngineOptions,
}

impl SyncEngine {
    pub fn new(
        feed: TrendyolClient,
        store: AirtableClient,
        watermark: WatermarkStore,
        tables: Tables,
        options: EngineOptions,
    ) -> Self {
        Self {
            feed,
            store,
            watermark,
            tables,
            options,
        }
    }

    /// Build the engine and both remote clients from loaded configuration.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let timeout = std::time::Duration::from_secs(config.sync.request_timeout_seconds);
        let feed = TrendyolClient::new(
            &config.trendyol_api_base,
            config.trendyol_seller_id.clone(),
            config.trendyol_api_key.clone(),
            config.trendyol_api_secret.clone(),
            config.trendyol_feed,
            config.trendyol_auth_style,
            timeout,
        )
        .map_err(|err| anyhow::anyhow!("failed to build feed client: {err}"))?;
        let store = AirtableClient::new(
            &config.airtable_api_base,
            config.airtable_base_id.clone(),
            config.airtable_token.clone(),
            timeout,
        )
        .map_err(|err| anyhow::anyhow!("failed to build store client: {err}"))?;

        Ok(Self::new(
            feed,
            store,
            WatermarkStore::new(&config.watermark_path),
            Tables {
                orders: config.orders_table.clone(),
                customers: config.customers_table.clone(),
                inventory: config.inventory_table.clone(),
            },
            EngineOptions {
                page_size: config.sync.page_size,
                max_pages: config.sync.max_pages,
                lookback_hours: config.sync.lookback_hours,
                sales_channel: config.sync.sales_channel.clone(),
                initial_watermark_ms: config.watermark_ms,
            },
        ))
    }

    /// Run one reconciliation pass.
    #[instrument(skip(self))]
    pub async fn run_pass(&self) -> Result<PassSummary, SyncError> {
        gauge!("sync_in_progress").set(1.0);
        let _idle = scopeguard::guard((), |_| gauge!("sync_in_progress").set(0.0));

        let since = self
            .watermark
            .load()
            .or(self.options.initial_watermark_ms)
            .unwrap_or_else(|| {
                let fallback =
                    Utc::now() - chrono::Duration::hours(self.options.lookback_hours as i64);
                fallback.timestamp_millis()
            });

        info!(since_ms = since, "starting sync pass");

        let mut summary = PassSummary::default();
        let mut max_seen_ms: Option<i64> = None;
        let mut page = 0u32;

        loop {
            let batch = self
                .feed
                .list_orders(page, self.options.page_size, Some(since))
                .await?;
            summary.pages += 1;

            if batch.content.is_empty() {
                break;
            }
            let exhausted = !batch.has_more();

            for raw in batch.content {
                summary.seen += 1;
                let order = match ValidOrder::from_raw(raw) {
                    Ok(order) => order,
                    Err(err) => {
                        warn!(error = %err, "skipping malformed source order");
                        summary.invalid += 1;
                        counter!("orders_invalid_total").increment(1);
                        continue;
                    }
                };

                max_seen_ms = Some(max_seen_ms.map_or(order.timestamp_ms, |prev| {
                    prev.max(order.timestamp_ms)
                }));

                match self.sync_order(&order, &mut summary).await {
                    Ok(OrderOutcome::Created) => {
                        summary.created += 1;
                        counter!("orders_created_total").increment(1);
                    }
                    Ok(OrderOutcome::Duplicate) => {
                        debug!(order_id = %order.external_id, "order already synced");
                        summary.skipped += 1;
                        counter!("orders_skipped_total").increment(1);
                    }
                    Err(err) => {
                        error!(
                            order_id = %order.external_id,
                            error = %err,
                            "failed to sync order; continuing pass"
                        );
                        summary.failed += 1;
                        counter!("orders_failed_total").increment(1);
                    }
                }
            }

            page += 1;
            if exhausted {
                break;
            }
            if page >= self.options.max_pages {
                warn!(
                    max_pages = self.options.max_pages,
                    "page cap reached before the feed was exhausted"
                );
                break;
            }
        }

        // Advance and persist the watermark before reporting. A persist
        // failure is logged but does not fail the pass: re-fetching an
        // already-synced window is safe because passes dedup before create.
        if let Some(new_watermark) = max_seen_ms.filter(|ts| *ts > since) {
            match self.watermark.store(new_watermark) {
                Ok(()) => summary.watermark_ms = Some(new_watermark),
                Err(err) => {
                    error!(error = %err, "failed to persist watermark");
                    summary.watermark_ms = Some(new_watermark);
                }
            }
        } else {
            summary.watermark_ms = Some(since);
        }

        info!(
            seen = summary.seen,
            created = summary.created,
            skipped = summary.skipped,
            failed = summary.failed,
            invalid = summary.invalid,
            "sync pass completed"
        );

        Ok(summary)
    }

    /// Push a single order through the same per-order path the pass uses
    /// (webhook-style ingestion). Does not touch the watermark.
    pub async fn push_order(&self, raw: Order) -> Result<OrderOutcome, OrderError> {
        let order = ValidOrder::from_raw(raw)?;
        let mut scratch = PassSummary::default();
        let outcome = self.sync_order(&order, &mut scratch).await?;
        if let OrderOutcome::Created = outcome {
            counter!("orders_created_total").increment(1);
        }
        Ok(outcome)
    }

    /// Dedup, resolve related records, and create the destination row for
    /// one validated order.
    async fn sync_order(
        &self,
        order: &ValidOrder,
        summary: &mut PassSummary,
    ) -> Result<OrderOutcome, StoreError> {
        let existing = self
            .store
            .search(
                &self.tables.orders,
                &Formula::eq(FIELD_ORDER_ID, &order.external_id),
            )
            .await?;
        if !existing.is_empty() {
            return Ok(OrderOutcome::Duplicate);
        }

        let customer_record_id = self.resolve_customer(order, summary).await?;
        let inventory_links = self.resolve_inventory(order, summary).await;

        let fields = build_order_fields(
            order,
            &customer_record_id,
            &inventory_links,
            &self.options.sales_channel,
        );
        self.store.create(&self.tables.orders, fields).await?;
        Ok(OrderOutcome::Created)
    }

    /// Search the customer by external id, creating it on first sight.
    async fn resolve_customer(
        &self,
        order: &ValidOrder,
        summary: &mut PassSummary,
    ) -> Result<String, StoreError> {
        let found = self
            .store
            .search(
                &self.tables.customers,
                &Formula::eq(FIELD_CUSTOMER_ID, &order.customer_key),
            )
            .await?;
        if let Some(record) = found.first() {
            return Ok(record.id.clone());
        }

        let mut fields = serde_json::Map::new();
        fields.insert(FIELD_CUSTOMER_ID.to_string(), json!(order.customer_key));
        if let Some(name) = &order.customer_name {
            fields.insert(FIELD_CUSTOMER_NAME.to_string(), json!(name));
        }
        if let Some(phone) = &order.customer_phone {
            fields.insert(FIELD_CUSTOMER_PHONE.to_string(), json!(phone));
        }
        if let Some(address) = &order.customer_address {
            fields.insert(FIELD_CUSTOMER_ADDRESS.to_string(), json!(address));
        }
        fields.insert(
            FIELD_ACQUISITION_CHANNEL.to_string(),
            json!(self.options.sales_channel),
        );

        let record = self
            .store
            .create(&self.tables.customers, JsonValue::Object(fields))
            .await?;
        summary.customers_created += 1;
        counter!("customers_created_total").increment(1);
        info!(customer_id = %order.customer_key, record_id = %record.id, "customer created");
        Ok(record.id)
    }

    /// Look up the inventory record for each line's SKU. A missing SKU or a
    /// failed lookup leaves that line unlinked; it never blocks the order.
    async fn resolve_inventory(&self, order: &ValidOrder, summary: &mut PassSummary) -> Vec<String> {
        let mut links = Vec::new();
        for line in &order.lines {
            let Some(sku) = line.sku.as_deref().filter(|s| !s.trim().is_empty()) else {
                warn!(order_id = %order.external_id, "line item without SKU; leaving link empty");
                summary.inventory_misses += 1;
                counter!("inventory_miss_total").increment(1);
                continue;
            };

            match self
                .store
                .search(&self.tables.inventory, &Formula::eq(FIELD_SKU, sku))
                .await
            {
                Ok(records) => match records.first() {
                    Some(record) => links.push(record.id.clone()),
                    None => {
                        warn!(order_id = %order.external_id, sku, "no inventory record for SKU");
                        summary.inventory_misses += 1;
                        counter!("inventory_miss_total").increment(1);
                    }
                },
                Err(err) => {
                    // Inventory lookups fall back to an empty link; the
                    // order still goes through.
                    warn!(order_id = %order.external_id, sku, error = %err, "inventory lookup failed");
                    summary.inventory_misses += 1;
                    counter!("inventory_miss_total").increment(1);
                }
            }
        }
        links
    }
}

/// Render the epoch-ms order timestamp as a UTC civil date.
fn order_date_string(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .unwrap_or_else(Utc::now)
        .date_naive()
        .to_string()
}

/// Assemble the destination order row. One row per source order; multiple
/// lines fold into newline-joined product/quantity/price fields.
fn build_order_fields(
    order: &ValidOrder,
    customer_record_id: &str,
    inventory_links: &[String],
    sales_channel: &str,
) -> JsonValue {
    let (shipping, payment) = map_status(order.status.as_deref());

    let mut fields = serde_json::Map::new();
    fields.insert(FIELD_ORDER_ID.to_string(), json!(order.external_id));
    fields.insert(FIELD_ORDER_NUMBER.to_string(), json!(order.order_number));
    fields.insert(
        FIELD_CUSTOMER_LINK.to_string(),
        json!([customer_record_id]),
    );
    if !inventory_links.is_empty() {
        fields.insert(FIELD_INVENTORY_LINK.to_string(), json!(inventory_links));
    }
    fields.insert(
        FIELD_ORDER_DATE.to_string(),
        json!(order_date_string(order.timestamp_ms)),
    );
    fields.insert(FIELD_PAYMENT_STATUS.to_string(), json!(payment.as_str()));
    fields.insert(FIELD_SHIPPING_STATUS.to_string(), json!(shipping.as_str()));
    fields.insert(FIELD_SALES_CHANNEL.to_string(), json!(sales_channel));

    if !order.lines.is_empty() {
        let products: Vec<String> = order
            .lines
            .iter()
            .map(|line| {
                line.product_name
                    .clone()
                    .or_else(|| line.sku.clone())
                    .unwrap_or_else(|| "Unknown item".to_string())
            })
            .collect();
        fields.insert(FIELD_PRODUCT.to_string(), json!(products.join("\n")));

        if order.lines.len() == 1 {
            let line = &order.lines[0];
            fields.insert(FIELD_QUANTITY.to_string(), json!(line.quantity));
            if let Some(price) = &line.price {
                fields.insert(FIELD_PRICE.to_string(), json!(price));
            }
        } else {
            let quantities: Vec<String> = order
                .lines
                .iter()
                .map(|line| line.quantity.to_string())
                .collect();
            let prices: Vec<String> = order
                .lines
                .iter()
                .map(|line| {
                    line.price
                        .as_ref()
                        .map(|p| p.to_string())
                        .unwrap_or_default()
                })
                .collect();
            fields.insert(FIELD_QUANTITY.to_string(), json!(quantities.join("\n")));
            fields.insert(FIELD_PRICE.to_string(), json!(prices.join("\n")));
        }
    }

    JsonValue::Object(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trendyol::{LineItem, ShipmentAddress};

    fn raw_order() -> Order {
        Order {
            id: Some(100),
            order_number: Some("TY-100".to_string()),
            customer_id: Some(7),
            order_date: Some(1_700_000_000_000),
            status: Some("delivered".to_string()),
            lines: vec![LineItem {
                sku: Some("SKU1".to_string()),
                product_name: Some("Mug".to_string()),
                quantity: 2,
                price: serde_json::Number::from_f64(19.9),
            }],
            shipment_address: Some(ShipmentAddress {
                full_name: Some("Ada Lovelace".to_string()),
                phone: Some("+90 555".to_string()),
                address1: Some("12 Analytical St".to_string()),
                city: Some("Istanbul".to_string()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn validation_accepts_complete_order() {
        let order = ValidOrder::from_raw(raw_order()).unwrap();
        assert_eq!(order.external_id, "100");
        assert_eq!(order.order_number, "TY-100");
        assert_eq!(order.customer_key, "7");
        assert_eq!(order.customer_name.as_deref(), Some("Ada Lovelace"));
    }

    #[test]
    fn validation_falls_back_to_order_number_for_id() {
        let mut raw = raw_order();
        raw.id = None;
        let order = ValidOrder::from_raw(raw).unwrap();
        assert_eq!(order.external_id, "TY-100");
    }

    #[test]
    fn validation_rejects_missing_id_and_number() {
        let mut raw = raw_order();
        raw.id = None;
        raw.order_number = None;
        assert_eq!(
            ValidOrder::from_raw(raw).unwrap_err(),
            ValidationError::MissingOrderId
        );
    }

    #[test]
    fn validation_rejects_missing_timestamp() {
        let mut raw = raw_order();
        raw.order_date = None;
        assert!(matches!(
            ValidOrder::from_raw(raw).unwrap_err(),
            ValidationError::MissingTimestamp { .. }
        ));
    }

    #[test]
    fn validation_rejects_missing_customer() {
        let mut raw = raw_order();
        raw.customer_id = None;
        assert!(matches!(
            ValidOrder::from_raw(raw).unwrap_err(),
            ValidationError::MissingCustomer { .. }
        ));
    }

    #[test]
    fn empty_lines_are_allowed() {
        let mut raw = raw_order();
        raw.lines.clear();
        assert!(ValidOrder::from_raw(raw).is_ok());
    }

    #[test]
    fn order_date_is_utc_civil_date() {
        // 2023-11-14T22:13:20Z
        assert_eq!(order_date_string(1_700_000_000_000), "2023-11-14");
        // A timestamp just past a UTC midnight lands on the next day.
        assert_eq!(order_date_string(1_700_006_400_000), "2023-11-15");
    }

    #[test]
    fn single_line_order_fields() {
        let order = ValidOrder::from_raw(raw_order()).unwrap();
        let fields = build_order_fields(&order, "recCust", &["recInv".to_string()], "Trendyol");
        let fields = fields.as_object().unwrap();

        assert_eq!(fields.get("Order ID").unwrap(), "100");
        assert_eq!(fields.get("Customer").unwrap(), &json!(["recCust"]));
        assert_eq!(fields.get("Inventory").unwrap(), &json!(["recInv"]));
        assert_eq!(fields.get("Order Date").unwrap(), "2023-11-14");
        assert_eq!(fields.get("Shipping Status").unwrap(), "Shipped");
        assert_eq!(fields.get("Payment Status").unwrap(), "Pending");
        assert_eq!(fields.get("Sales Channel").unwrap(), "Trendyol");
        assert_eq!(fields.get("Product").unwrap(), "Mug");
        assert_eq!(fields.get("Quantity").unwrap(), 2);
    }

    #[test]
    fn multi_line_order_folds_into_joined_fields() {
        let mut raw = raw_order();
        raw.lines.push(LineItem {
            sku: Some("SKU2".to_string()),
            product_name: Some("Plate".to_string()),
            quantity: 1,
            price: serde_json::Number::from_f64(7.5),
        });
        let order = ValidOrder::from_raw(raw).unwrap();
        let fields = build_order_fields(&order, "recCust", &[], "Trendyol");
        let fields = fields.as_object().unwrap();

        assert_eq!(fields.get("Product").unwrap(), "Mug\nPlate");
        assert_eq!(fields.get("Quantity").unwrap(), "2\n1");
        assert_eq!(fields.get("Price").unwrap(), "19.9\n7.5");
        assert!(fields.get("Inventory").is_none());
    }

    #[test]
    fn zero_line_order_omits_product_fields() {
        let mut raw = raw_order();
        raw.lines.clear();
        raw.status = Some("cancelled".to_string());
        let order = ValidOrder::from_raw(raw).unwrap();
        let fields = build_order_fields(&order, "recCust", &[], "Trendyol");
        let fields = fields.as_object().unwrap();

        assert!(fields.get("Product").is_none());
        assert!(fields.get("Quantity").is_none());
        assert_eq!(fields.get("Shipping Status").unwrap(), "New");
        assert_eq!(fields.get("Payment Status").unwrap(), "Failed");
    }
}
