//! Cart validation and pricing.
//!
//! Customers send product ids and quantities; prices always come from the
//! account's menu.

use std::collections::HashMap;

use qrd_schemas::{OrderLine, Product};
use serde::{Deserialize, Serialize};

use crate::error::{OrderError, OrderResult};

pub const MAX_NOTE_CHARS: usize = 280;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLimits {
    pub max_line_quantity: u32,
    pub max_lines: usize,
}

impl Default for CartLimits {
    fn default() -> Self {
        Self {
            max_line_quantity: 99,
            max_lines: 50,
        }
    }
}

/// A line as submitted by the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedLine {
    pub product_id: String,
    pub quantity: u32,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub lines: Vec<RequestedLine>,
    #[serde(default)]
    pub customer_note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedOrder {
    pub lines: Vec<OrderLine>,
    pub total_cents: i64,
    pub customer_note: Option<String>,
}

/// Trim, drop blanks, cap length on a char boundary.
pub fn clean_note(note: Option<&str>) -> Option<String> {
    let t = note?.trim();
    if t.is_empty() {
        return None;
    }
    Some(t.chars().take(MAX_NOTE_CHARS).collect())
}

/// Price `request` against `menu` (the account's products keyed by id).
pub fn price_order(
    request: &OrderRequest,
    menu: &HashMap<String, Product>,
    limits: CartLimits,
) -> OrderResult<PricedOrder> {
    if request.lines.is_empty() {
        return Err(OrderError::EmptyOrder);
    }

    // Merge duplicates (same product, same note) preserving first-seen order.
    // The line limit applies as distinct lines appear, before any pricing.
    let mut merged: Vec<(String, Option<String>, u32)> = Vec::new();
    let mut index: HashMap<(&str, Option<String>), usize> = HashMap::new();
    for line in &request.lines {
        if line.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                product_id: line.product_id.clone(),
                quantity: 0,
            });
        }
        let note = clean_note(line.note.as_deref());
        match index.get(&(line.product_id.as_str(), note.clone())) {
            Some(&i) => merged[i].2 = merged[i].2.saturating_add(line.quantity),
            None => {
                if merged.len() == limits.max_lines {
                    return Err(OrderError::TooManyLines {
                        count: merged.len() + 1,
                        max: limits.max_lines,
                    });
                }
                index.insert((line.product_id.as_str(), note.clone()), merged.len());
                merged.push((line.product_id.clone(), note, line.quantity));
            }
        }
    }

    let mut lines = Vec::with_capacity(merged.len());
    let mut total: i64 = 0;

    for (product_id, note, quantity) in merged {
        if quantity > limits.max_line_quantity {
            return Err(OrderError::InvalidQuantity {
                product_id,
                quantity,
            });
        }

        let product = match menu.get(&product_id) {
            Some(p) if p.available => p,
            _ => return Err(OrderError::ProductUnavailable(product_id)),
        };

        let line = OrderLine {
            product_id,
            name: product.name.clone(),
            unit_price_cents: product.price_cents,
            quantity,
            note,
        };

        total = line
            .line_total_cents()
            .and_then(|lt| total.checked_add(lt))
            .ok_or_else(|| OrderError::InvalidQuantity {
                product_id: line.product_id.clone(),
                quantity,
            })?;

        lines.push(line);
    }

    Ok(PricedOrder {
        lines,
        total_cents: total,
        customer_note: clean_note(request.customer_note.as_deref()),
    })
}
