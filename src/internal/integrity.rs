pub mod integrity_verifier;
