//! Embedding (de)serialization and the cosine-similarity scalar function.
//!
//! Embeddings are packed as little-endian `f32` BLOBs. Rather than reach for a separate vector
//! extension, `cosine_similarity(a, b)` is registered directly on the connection via
//! `rusqlite::functions`, so the top-k query in `vector::top_k` is a single `ORDER BY` — the
//! idiomatic single-instance stand-in for a native vector type with a cosine index.

use anyhow::{Context, Result};
use rusqlite::{
    functions::{Context as FnContext, FunctionFlags},
    types::ValueRef,
    Connection,
};

pub fn pack(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for f in v {
        out.extend_from_slice(&f.to_le_bytes());
    }
    out
}

pub fn unpack(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub fn register_cosine_similarity(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "cosine_similarity",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx: &FnContext| {
            let a = blob_arg(ctx, 0)?;
            let b = blob_arg(ctx, 1)?;
            Ok(cosine_similarity(&a, &b))
        },
    )
    .context("create_scalar_function cosine_similarity")
}

fn blob_arg(ctx: &FnContext, idx: usize) -> rusqlite::Result<Vec<f32>> {
    match ctx.get_raw(idx) {
        ValueRef::Blob(b) => Ok(unpack(b)),
        _ => Ok(Vec::new()),
    }
}
