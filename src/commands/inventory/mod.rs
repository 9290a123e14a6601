pub mod items;
pub mod legacy;
pub mod stock;
