pub mod inventory;
pub mod turnos;
