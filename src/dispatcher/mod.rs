mod dispatcher;
mod region;
mod worker;

pub use dispatcher::Dispatcher;
