/// This module contains logic for detecting transaction conflicts at commit time.
pub mod detection;
