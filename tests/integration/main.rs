//! End-to-end resolution runs against mock market data.

mod mock_market;
mod resolution_run;
