//! Shopping cart: one entity per line plus a single coupon entity.
//!
//! Prices are integer minor units. A line's unit price is the product price
//! plus the variant's modifier.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::StoreOptions;
use crate::error::{Result, ValidationError};
use crate::storage::PersistenceBackend;
use crate::sync::{MutationHandle, RemoteCall, RemoteResult, SyncStore};
use crate::types::{Confirmation, EntityId, MutationKind, Record, ServerRecord};

use super::Domain;

/// Entity id of the applied coupon.
pub const COUPON_ENTITY: &str = "coupon";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: String,
    pub name: String,
    pub price: i64,
    #[serde(default)]
    pub images: Vec<String>,
    pub seller_id: String,
    pub seller_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSnapshot {
    pub id: String,
    pub name: String,
    pub price_modifier: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product: ProductSnapshot,
    #[serde(default)]
    pub variant: Option<VariantSnapshot>,
    pub quantity: u32,
    /// Unix milliseconds.
    pub added_at: u64,
}

impl CartLine {
    pub fn line_id(&self) -> EntityId {
        line_id(&self.product.id, self.variant.as_ref().map(|v| v.id.as_str()))
    }

    /// `None` if the price does not fit in an `i64`.
    pub fn unit_price(&self) -> Option<i64> {
        unit_price(&self.product, self.variant.as_ref())
    }

    /// `None` if the total does not fit in an `i64`.
    pub fn line_total(&self) -> Option<i64> {
        self.unit_price()?.checked_mul(i64::from(self.quantity))
    }
}

fn unit_price(product: &ProductSnapshot, variant: Option<&VariantSnapshot>) -> Option<i64> {
    product
        .price
        .checked_add(variant.map_or(0, |v| v.price_modifier))
}

/// Reject lines whose total cannot be represented.
fn priced(line: CartLine) -> std::result::Result<CartLine, ValidationError> {
    match line.line_total() {
        Some(_) => Ok(line),
        None => Err(ValidationError::new(
            "quantity",
            "a line total within range",
            line.quantity,
        )),
    }
}

/// Id of the line holding `product_id` in `variant_id`.
pub fn line_id(product_id: &str, variant_id: Option<&str>) -> EntityId {
    match variant_id {
        Some(variant) => format!("line:{product_id}:{variant}"),
        None => format!("line:{product_id}"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    /// Set by the server; zero until the coupon is confirmed.
    pub discount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CartEntry {
    Line(CartLine),
    Coupon(Coupon),
}

/// An item to add. `quantity` is signed so that bad input from the UI is
/// reported instead of wrapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCartItem {
    pub product: ProductSnapshot,
    pub variant: Option<VariantSnapshot>,
    pub quantity: i64,
    pub added_at: u64,
}

impl NewCartItem {
    pub fn line_id(&self) -> EntityId {
        line_id(&self.product.id, self.variant.as_ref().map(|v| v.id.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartIntent {
    /// Merges into the existing line for the same product and variant.
    AddItem(NewCartItem),
    UpdateQuantity { line_id: EntityId, quantity: i64 },
    RemoveItem { line_id: EntityId },
    ApplyCoupon { code: String },
    RemoveCoupon,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartTotals {
    /// Sum of quantities.
    pub item_count: u64,
    pub line_count: usize,
    pub subtotal: i64,
    pub discount: i64,
    /// `max(0, subtotal - discount)`.
    pub total: i64,
    pub coupon_code: Option<String>,
}

pub struct Cart;

fn quantity(path: &str, value: i64) -> std::result::Result<u32, ValidationError> {
    match u32::try_from(value) {
        Ok(q) if q >= 1 => Ok(q),
        _ => Err(ValidationError::new(path, "a quantity of at least 1", value)),
    }
}

fn expect_line<'a>(
    line_id: &str,
    current: Option<&'a CartEntry>,
) -> std::result::Result<&'a CartLine, ValidationError> {
    match current {
        Some(CartEntry::Line(line)) => Ok(line),
        _ => Err(ValidationError::new("line_id", "a line in the cart", line_id)),
    }
}

impl Domain for Cart {
    type Payload = CartEntry;
    type Intent = CartIntent;
    type Aggregates = CartTotals;

    const NAME: &'static str = "cart";

    fn target(intent: &CartIntent) -> EntityId {
        match intent {
            CartIntent::AddItem(item) => item.line_id(),
            CartIntent::UpdateQuantity { line_id, .. } | CartIntent::RemoveItem { line_id } => {
                line_id.clone()
            }
            CartIntent::ApplyCoupon { .. } | CartIntent::RemoveCoupon => COUPON_ENTITY.to_string(),
        }
    }

    fn kind(intent: &CartIntent, current: Option<&CartEntry>) -> MutationKind {
        match intent {
            CartIntent::AddItem(_) if current.is_none() => MutationKind::Add,
            CartIntent::AddItem(_) | CartIntent::UpdateQuantity { .. } => MutationKind::Update,
            CartIntent::RemoveItem { .. } => MutationKind::Remove,
            CartIntent::ApplyCoupon { .. } | CartIntent::RemoveCoupon => MutationKind::Recompute,
        }
    }

    fn check(intent: &CartIntent) -> std::result::Result<(), ValidationError> {
        match intent {
            CartIntent::AddItem(item) => {
                quantity("quantity", item.quantity)?;
                if item.product.id.is_empty() {
                    return Err(ValidationError::new("product.id", "a product id", "\"\""));
                }
                if item.product.price < 0 {
                    return Err(ValidationError::new(
                        "product.price",
                        "a non-negative price",
                        item.product.price,
                    ));
                }
                let total = quantity("quantity", item.quantity).ok().and_then(|q| {
                    unit_price(&item.product, item.variant.as_ref())?.checked_mul(i64::from(q))
                });
                if total.is_none() {
                    return Err(ValidationError::new(
                        "product.price",
                        "a line total within range",
                        item.product.price,
                    ));
                }
            }
            CartIntent::UpdateQuantity { quantity: q, .. } => {
                quantity("quantity", *q)?;
            }
            CartIntent::ApplyCoupon { code } if code.trim().is_empty() => {
                return Err(ValidationError::new("code", "a coupon code", "\"\""));
            }
            CartIntent::RemoveItem { .. } | CartIntent::ApplyCoupon { .. } | CartIntent::RemoveCoupon => {}
        }
        Ok(())
    }

    fn apply(
        intent: &CartIntent,
        current: Option<&CartEntry>,
    ) -> std::result::Result<Option<CartEntry>, ValidationError> {
        match intent {
            CartIntent::AddItem(item) => {
                let added = quantity("quantity", item.quantity)?;
                let line = match current {
                    Some(CartEntry::Line(existing)) => {
                        let merged = existing.quantity.checked_add(added).ok_or_else(|| {
                            ValidationError::new(
                                "quantity",
                                "a representable quantity",
                                i64::from(existing.quantity) + item.quantity,
                            )
                        })?;
                        CartLine {
                            quantity: merged,
                            ..existing.clone()
                        }
                    }
                    _ => CartLine {
                        product: item.product.clone(),
                        variant: item.variant.clone(),
                        quantity: added,
                        added_at: item.added_at,
                    },
                };
                Ok(Some(CartEntry::Line(priced(line)?)))
            }
            CartIntent::UpdateQuantity { line_id, quantity: q } => {
                let line = expect_line(line_id, current)?;
                let updated = CartLine {
                    quantity: quantity("quantity", *q)?,
                    ..line.clone()
                };
                Ok(Some(CartEntry::Line(priced(updated)?)))
            }
            CartIntent::RemoveItem { line_id } => {
                expect_line(line_id, current)?;
                Ok(None)
            }
            CartIntent::ApplyCoupon { code } => {
                let code = code.trim().to_string();
                // Keep a known discount while re-applying the same code.
                let discount = match current {
                    Some(CartEntry::Coupon(c)) if c.code == code => c.discount,
                    _ => 0,
                };
                Ok(Some(CartEntry::Coupon(Coupon { code, discount })))
            }
            CartIntent::RemoveCoupon => Ok(None),
        }
    }

    fn aggregate(records: &BTreeMap<EntityId, Record<CartEntry>>) -> CartTotals {
        let mut totals = CartTotals::default();
        for record in records.values() {
            match &record.payload {
                CartEntry::Line(line) => {
                    totals.item_count = totals.item_count.saturating_add(u64::from(line.quantity));
                    totals.line_count += 1;
                    // Server-sent lines are not validated; saturate instead.
                    let line_total = line.line_total().unwrap_or(i64::MAX);
                    totals.subtotal = totals.subtotal.saturating_add(line_total);
                }
                CartEntry::Coupon(coupon) => {
                    totals.discount = coupon.discount;
                    totals.coupon_code = Some(coupon.code.clone());
                }
            }
        }
        totals.total = totals.subtotal.saturating_sub(totals.discount).max(0);
        totals
    }
}

// ============================================================================
// Remote API
// ============================================================================

/// Cart endpoints. Each reply describes the affected entity as the server
/// now holds it.
#[async_trait]
pub trait CartApi: Send + Sync {
    async fn add_item(&self, item: &NewCartItem) -> RemoteResult<Confirmation<CartEntry>>;

    async fn update_item(&self, line_id: &str, quantity: u32) -> RemoteResult<Confirmation<CartEntry>>;

    async fn remove_item(&self, line_id: &str) -> RemoteResult<Confirmation<CartEntry>>;

    /// The confirmed coupon carries the server-computed discount.
    async fn apply_coupon(&self, code: &str) -> RemoteResult<Confirmation<CartEntry>>;

    async fn remove_coupon(&self) -> RemoteResult<Confirmation<CartEntry>>;

    async fn fetch_cart(&self) -> RemoteResult<Vec<ServerRecord<CartEntry>>>;
}

#[async_trait]
impl<T: CartApi> RemoteCall<Cart> for T {
    async fn commit(&self, intent: &CartIntent) -> RemoteResult<Confirmation<CartEntry>> {
        match intent {
            CartIntent::AddItem(item) => self.add_item(item).await,
            CartIntent::UpdateQuantity { line_id, quantity } => {
                // Validated before dispatch.
                let quantity = u32::try_from(*quantity).unwrap_or(u32::MAX);
                self.update_item(line_id, quantity).await
            }
            CartIntent::RemoveItem { line_id } => self.remove_item(line_id).await,
            CartIntent::ApplyCoupon { code } => self.apply_coupon(code.trim()).await,
            CartIntent::RemoveCoupon => self.remove_coupon().await,
        }
    }

    async fn fetch(&self) -> RemoteResult<Vec<ServerRecord<CartEntry>>> {
        self.fetch_cart().await
    }
}

// ============================================================================
// CartStore
// ============================================================================

pub struct CartStore {
    store: SyncStore<Cart>,
}

impl CartStore {
    pub fn new(
        remote: Arc<dyn RemoteCall<Cart>>,
        options: StoreOptions,
        backend: Option<Arc<dyn PersistenceBackend>>,
    ) -> Self {
        Self {
            store: SyncStore::new(remote, options, backend),
        }
    }

    pub fn add_item(&self, item: NewCartItem) -> Result<MutationHandle<CartEntry>> {
        self.store.dispatch(CartIntent::AddItem(item))
    }

    pub fn update_quantity(
        &self,
        line_id: impl Into<EntityId>,
        quantity: i64,
    ) -> Result<MutationHandle<CartEntry>> {
        self.store.dispatch(CartIntent::UpdateQuantity {
            line_id: line_id.into(),
            quantity,
        })
    }

    pub fn remove_item(&self, line_id: impl Into<EntityId>) -> Result<MutationHandle<CartEntry>> {
        self.store.dispatch(CartIntent::RemoveItem {
            line_id: line_id.into(),
        })
    }

    pub fn apply_coupon(&self, code: impl Into<String>) -> Result<MutationHandle<CartEntry>> {
        self.store.dispatch(CartIntent::ApplyCoupon { code: code.into() })
    }

    pub fn remove_coupon(&self) -> Result<MutationHandle<CartEntry>> {
        self.store.dispatch(CartIntent::RemoveCoupon)
    }

    /// Remove every line and the coupon. Each removal is its own mutation;
    /// the first failure, whether from dispatch or from the server, is
    /// returned after every dispatched removal has settled.
    pub async fn clear_cart(&self) -> Result<()> {
        let mut handles = Vec::new();
        let mut first_error = None;
        for (id, record) in self.store.state().records {
            let intent = match record.payload {
                CartEntry::Line(_) => CartIntent::RemoveItem { line_id: id },
                CartEntry::Coupon(_) => CartIntent::RemoveCoupon,
            };
            match self.store.dispatch(intent) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn lines(&self) -> Vec<CartLine> {
        self.store
            .state()
            .records
            .into_values()
            .filter_map(|r| match r.payload {
                CartEntry::Line(line) => Some(line),
                CartEntry::Coupon(_) => None,
            })
            .collect()
    }

    pub fn totals(&self) -> CartTotals {
        self.store.aggregates()
    }
}

impl Deref for CartStore {
    type Target = SyncStore<Cart>;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}
