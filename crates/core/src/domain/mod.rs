pub mod display;
pub mod marker;
pub mod match_request;
