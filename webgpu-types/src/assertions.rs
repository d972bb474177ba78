//! Usage bit values are part of the WebGPU API surface and must never drift.

use crate::{BufferUsages, TextureUsages};
use static_assertions::const_assert_eq;

const_assert_eq!(BufferUsages::MAP_READ.bits(), 1);
const_assert_eq!(BufferUsages::MAP_WRITE.bits(), 2);
const_assert_eq!(BufferUsages::COPY_SRC.bits(), 4);
const_assert_eq!(BufferUsages::COPY_DST.bits(), 8);
const_assert_eq!(BufferUsages::INDEX.bits(), 16);
const_assert_eq!(BufferUsages::VERTEX.bits(), 32);
const_assert_eq!(BufferUsages::UNIFORM.bits(), 64);
const_assert_eq!(BufferUsages::STORAGE.bits(), 128);
const_assert_eq!(BufferUsages::INDIRECT.bits(), 256);

const_assert_eq!(TextureUsages::COPY_SRC.bits(), 1);
const_assert_eq!(TextureUsages::COPY_DST.bits(), 2);
const_assert_eq!(TextureUsages::TEXTURE_BINDING.bits(), 4);
const_assert_eq!(TextureUsages::STORAGE_BINDING.bits(), 8);
const_assert_eq!(TextureUsages::RENDER_ATTACHMENT.bits(), 16);

const_assert_eq!(crate::padded_bytes_per_row(800), 1024);
