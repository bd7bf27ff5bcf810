pub mod graph;
pub mod messenger;
pub mod whatsapp;
