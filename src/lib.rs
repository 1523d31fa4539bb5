pub mod candles;
pub mod clock;
pub mod config;
pub mod engine;
pub mod evaluator;
pub mod events;
pub mod exchange;
pub mod indicators;
pub mod journal;
pub mod logging;
pub mod reconcile;
pub mod reliability;
pub mod risk;
pub mod signals;
pub mod storage;
pub mod strategies;
pub mod strategy;
