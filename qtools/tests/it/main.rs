mod broker;
mod helper;
mod request;
