pub mod delivery;
pub mod entities;
pub mod value_objects;
