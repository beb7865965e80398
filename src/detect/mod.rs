// Volume format detection from file header bytes.

pub mod format;
