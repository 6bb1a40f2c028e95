pub mod config;
pub mod digest;
pub mod site;

pub mod rendezvous {
    pub mod message;
    pub mod registry;
    pub mod server;
}

pub mod tracker {
    pub mod client;
    pub mod http;
    pub mod index;
}

pub mod peer {
    pub mod endpoint;
    pub mod message;
    pub mod session;
    pub mod transfer;
}
