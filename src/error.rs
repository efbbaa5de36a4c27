//! Custom error types for the ARPANSA UV service
//!
//! This module defines the error taxonomy shared by the feed client, the
//! configuration wizard, the entry store and the web server.

use std::fmt;

/// Main error type for the ARPANSA UV service
#[derive(Debug)]
pub enum ArpansaError {
    /// The feed could not be retrieved (transport failure or non-success status)
    Fetch(String),

    /// The feed body was retrieved but is not a well-formed XML document
    Parse(roxmltree::Error),

    /// A feed query was made before the first successful fetch
    NotReady,

    /// No location with this id exists in the current feed document
    UnknownLocation(String),

    /// The configuration wizard was driven with a step it does not know
    UnknownStep(String),

    /// No configuration entry is stored under this name
    UnknownEntry(String),

    /// Error occurred while parsing address
    AddressParse(std::net::AddrParseError),

    /// Error occurred while running the server
    ServerRun(std::io::Error),

    /// Error occurred while reading or writing the configuration file
    ConfigRead(std::io::Error),

    /// Error occurred while parsing configuration
    ConfigParse(json5::Error),

    /// Generic error with a message
    Generic(String),
}

impl fmt::Display for ArpansaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArpansaError::Fetch(msg) => {
                write!(f, "Failed to fetch UV feed: {msg}")
            }
            ArpansaError::Parse(e) => {
                write!(f, "Failed to parse UV feed: {e}")
            }
            ArpansaError::NotReady => {
                write!(f, "No UV feed has been fetched yet")
            }
            ArpansaError::UnknownLocation(id) => {
                write!(f, "Unknown location: {id}")
            }
            ArpansaError::UnknownStep(step) => {
                write!(f, "Unknown configuration step: {step}")
            }
            ArpansaError::UnknownEntry(name) => {
                write!(f, "Unknown configuration entry: {name}")
            }
            ArpansaError::AddressParse(e) => {
                write!(f, "Failed to parse network address: {e}")
            }
            ArpansaError::ServerRun(e) => {
                write!(f, "Server runtime error: {e}")
            }
            ArpansaError::ConfigRead(e) => {
                write!(f, "Failed to read configuration file: {e}")
            }
            ArpansaError::ConfigParse(e) => {
                write!(f, "Failed to parse configuration: {e}")
            }
            ArpansaError::Generic(msg) => {
                write!(f, "Error: {msg}")
            }
        }
    }
}

impl std::error::Error for ArpansaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArpansaError::Parse(e) => Some(e),
            ArpansaError::AddressParse(e) => Some(e),
            ArpansaError::ServerRun(e) => Some(e),
            ArpansaError::ConfigRead(e) => Some(e),
            ArpansaError::ConfigParse(e) => Some(e),
            ArpansaError::Fetch(_)
            | ArpansaError::NotReady
            | ArpansaError::UnknownLocation(_)
            | ArpansaError::UnknownStep(_)
            | ArpansaError::UnknownEntry(_)
            | ArpansaError::Generic(_) => None,
        }
    }
}

impl From<std::net::AddrParseError> for ArpansaError {
    fn from(error: std::net::AddrParseError) -> Self {
        ArpansaError::AddressParse(error)
    }
}

impl From<std::io::Error> for ArpansaError {
    fn from(error: std::io::Error) -> Self {
        ArpansaError::ConfigRead(error)
    }
}

impl From<json5::Error> for ArpansaError {
    fn from(error: json5::Error) -> Self {
        ArpansaError::ConfigParse(error)
    }
}

impl From<roxmltree::Error> for ArpansaError {
    fn from(error: roxmltree::Error) -> Self {
        ArpansaError::Parse(error)
    }
}

impl From<reqwest::Error> for ArpansaError {
    fn from(error: reqwest::Error) -> Self {
        ArpansaError::Fetch(error.to_string())
    }
}

impl From<&str> for ArpansaError {
    fn from(msg: &str) -> Self {
        ArpansaError::Generic(msg.to_string())
    }
}

impl From<String> for ArpansaError {
    fn from(msg: String) -> Self {
        ArpansaError::Generic(msg)
    }
}

/// Result type alias using our custom error type
pub type Result<T> = std::result::Result<T, ArpansaError>;
