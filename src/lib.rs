pub mod config;
pub mod ipc;
pub mod notify;
pub mod process_monitor;
pub mod protocol; // 원격 상태 프로토콜 (envelope + 모듈 목록)
pub mod registry;
pub mod supervisor;
