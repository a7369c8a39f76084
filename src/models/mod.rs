// ============================================================================
// Domain Models
// ============================================================================

mod order;
mod validation;

pub use order::{Delivery, Item, Order, Payment};

#[cfg(test)]
pub(crate) use order::tests::{sample_order, SAMPLE_ORDER};
