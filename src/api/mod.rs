pub mod control;

pub use control::router as control_router;
