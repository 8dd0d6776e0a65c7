pub mod black_scholes;
pub mod confidence;
pub mod ratios;
pub mod volatility;
