#![no_main]
use libfuzzer_sys::fuzz_target;
use rootio::{File, StreamerRegistry};
use std::io::Cursor;
use std::sync::Arc;

// Opening arbitrary bytes must return an error or a usable file, never panic.
fuzz_target!(|data: &[u8]| {
    let storage = rootio::ReadOnlyStorage::new(Cursor::new(data.to_vec()));
    let registry = Arc::new(StreamerRegistry::new());
    let Ok(mut file) = File::from_storage(Box::new(storage), "fuzz", registry) else {
        return;
    };

    let names: Vec<String> = file.keys().iter().map(|k| k.name().to_string()).collect();
    for name in names {
        let _ = file.get(&name);
    }
    let _ = file.read_free_segments();
});
