//! In-memory tar and tar.gz builders.

use std::io::Write;

use flate2::{write::GzEncoder, Compression};

/// Plain tar of `(path, contents)` entries. Paths ending in `.sh` are executable.
pub fn tar(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(if path.ends_with(".sh") { 0o755 } else { 0o644 });
        header.set_cksum();
        builder.append_data(&mut header, path, *data).expect("append tar entry");
    }
    builder.into_inner().expect("finish tar")
}

pub fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(&tar(files)).expect("gzip tar");
    gz.finish().expect("finish gzip")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn tar_gz_round_trips_through_flate2() {
        let bytes = tar_gz(&[("chart/values.yaml", b"a: 1\n"), ("install.sh", b"#!/bin/sh\n")]);
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
        let mut archive = ::tar::Archive::new(flate2::read::GzDecoder::new(&bytes[..]));
        let mut seen = vec![];
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mode = entry.header().mode().unwrap();
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            seen.push((path, mode, body));
        }
        assert_eq!(seen[0], ("chart/values.yaml".to_string(), 0o644, "a: 1\n".to_string()));
        assert_eq!(seen[1].1, 0o755);
    }
}
