// Relay: single-slot command hand-off from the producer to the consumer.
// Ingress thread decodes datagrams into the mailbox; the forwarder thread
// sends only the latest distinct value downstream.

pub mod command;
pub mod mailbox;
pub mod counters;
pub mod ingress;
pub mod forwarder;
pub mod service;
