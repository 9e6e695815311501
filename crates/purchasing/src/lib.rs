//! Purchasing domain module (purchase lots, event-sourced).
//!
//! A purchase lot is one acquisition batch of a raw material. The purchasing
//! workflow owns it; the inventory ledger only reads it to derive stock.

pub mod lot;

pub use lot::{
    CorrectLot, LotCorrected, LotMarkedUsed, LotRegistered, LotSpec, LotStatus, MarkLotUsed,
    MaterialCategory, PurchaseLot, PurchaseLotCommand, PurchaseLotEvent, PurchaseLotId,
    RegisterLot,
};
