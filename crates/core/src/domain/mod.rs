pub mod history;
pub mod reference;
pub mod sku;
