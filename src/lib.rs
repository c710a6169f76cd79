/// A module containing networks, graphs, junction trees and potential tables
pub mod core;
/// A module containing message passing, evidence handling and queries over a compiled network
pub mod inference;
/// A module generating random networks
pub mod random;

#[cfg(test)]
mod tests;
