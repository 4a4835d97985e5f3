pub mod audit;
pub mod catalog;
pub mod cleaner;
pub mod config;
pub mod erp;
pub mod extraction;
pub mod feedback;
pub mod fsio;
pub mod llm;
pub mod mailbox;
pub mod matching;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod supervisor;
