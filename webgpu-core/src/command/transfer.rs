use std::sync::Arc;

use thiserror::Error;
use wgt::{BufferAddress, BufferUsages, Extent3d, TextureUsages, COPY_BUFFER_ALIGNMENT};

use crate::{
    api_log,
    command::{Command, CommandEncoder, CommandEncoderError},
    device::{Device, DeviceError},
    error::{ErrorType, WebGpuError},
    hal_api::HalApi,
    resource::{
        Buffer, BufferUseError, DestroyedResourceError, InvalidResourceError, Labeled,
        MissingBufferUsageError, MissingTextureUsageError, ParentDevice, ResourceErrorIdent,
        Texture, TextureErrorDimension,
    },
};

/// A buffer side of a copy between a buffer and a texture.
#[derive(Clone, Debug)]
pub struct ImageCopyBuffer<'a, A: HalApi> {
    pub buffer: &'a Arc<Buffer<A>>,
    pub layout: wgt::ImageDataLayout,
}

/// A texture side of a copy between a buffer and a texture.
#[derive(Clone, Debug)]
pub struct ImageCopyTexture<'a, A: HalApi> {
    pub texture: &'a Arc<Texture<A>>,
    pub mip_level: u32,
    pub origin: wgt::Origin3d,
    pub aspect: wgt::TextureAspect,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopySide {
    Source,
    Destination,
}

/// Error encountered while attempting a data transfer.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum TransferError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    BufferUse(#[from] BufferUseError),
    #[error(transparent)]
    InvalidResource(#[from] InvalidResourceError),
    #[error(transparent)]
    DestroyedResource(#[from] DestroyedResourceError),
    #[error("Source and destination cannot be the same buffer")]
    SameSourceDestinationBuffer,
    #[error(transparent)]
    MissingBufferUsage(#[from] MissingBufferUsageError),
    #[error(transparent)]
    MissingTextureUsage(#[from] MissingTextureUsageError),
    #[error("Copy of {start_offset}..{end_offset} would end up overrunning the bounds of the {side:?} buffer of size {buffer_size}")]
    BufferOverrun {
        start_offset: BufferAddress,
        end_offset: BufferAddress,
        buffer_size: BufferAddress,
        side: CopySide,
    },
    #[error("Copy of {dimension:?} {start_offset}..{end_offset} would end up overrunning the bounds of the {side:?} texture of {dimension:?} size {texture_size}")]
    TextureOverrun {
        start_offset: u32,
        end_offset: u32,
        texture_size: u32,
        dimension: TextureErrorDimension,
        side: CopySide,
    },
    #[error("Mip level {requested} is out of range, {texture} only has {count}")]
    InvalidMipLevel {
        texture: ResourceErrorIdent,
        requested: u32,
        count: u32,
    },
    #[error("Unable to select texture aspect {aspect:?} from format {format:?}")]
    InvalidTextureAspect {
        format: wgt::TextureFormat,
        aspect: wgt::TextureAspect,
    },
    #[error("Copying must select exactly one aspect of {format:?}, {aspect:?} does not")]
    CopyAspectNotOne {
        format: wgt::TextureFormat,
        aspect: wgt::TextureAspect,
    },
    #[error("Copying from textures with format {format:?} and aspect {aspect:?} is forbidden")]
    CopyFromForbiddenTextureFormat {
        format: wgt::TextureFormat,
        aspect: wgt::TextureAspect,
    },
    #[error("Copying to textures with format {format:?} and aspect {aspect:?} is forbidden")]
    CopyToForbiddenTextureFormat {
        format: wgt::TextureFormat,
        aspect: wgt::TextureAspect,
    },
    #[error("Multisampled {0} can not be copied")]
    MultisampledCopy(ResourceErrorIdent),
    #[error("Copy size {0} does not respect `COPY_BUFFER_ALIGNMENT`")]
    UnalignedCopySize(BufferAddress),
    #[error("Copy offset {0} does not respect `COPY_BUFFER_ALIGNMENT`")]
    UnalignedCopyOffset(BufferAddress),
    #[error("Buffer offset {0} is not aligned to the texel block size")]
    UnalignedBufferOffset(BufferAddress),
    #[error("Copy bytes per row {0} is not a multiple of `COPY_BYTES_PER_ROW_ALIGNMENT`")]
    UnalignedBytesPerRow(u32),
    #[error("Bytes per row {bytes_per_row} is smaller than a row of the copy, {row_size} bytes")]
    InvalidBytesPerRow {
        bytes_per_row: u32,
        row_size: BufferAddress,
    },
    #[error("Number of bytes per row needs to be specified since more than one row is copied")]
    UnspecifiedBytesPerRow,
    #[error("Rows per image {rows_per_image} is smaller than the copy height {height}")]
    InvalidRowsPerImage { rows_per_image: u32, height: u32 },
    #[error("Number of rows per image needs to be specified since more than one image is copied")]
    UnspecifiedRowsPerImage,
}

impl WebGpuError for TransferError {
    fn webgpu_error_type(&self) -> ErrorType {
        match *self {
            Self::Device(ref e) => e.webgpu_error_type(),
            _ => ErrorType::Validation,
        }
    }
}

/// Error raised by an encoder-level command.
#[derive(Clone, Debug, Error)]
pub enum CopyError {
    #[error(transparent)]
    Encoder(#[from] CommandEncoderError),
    #[error("Copy error")]
    Transfer(#[from] TransferError),
}

impl WebGpuError for CopyError {
    fn webgpu_error_type(&self) -> ErrorType {
        match *self {
            Self::Encoder(ref e) => e.webgpu_error_type(),
            Self::Transfer(ref e) => e.webgpu_error_type(),
        }
    }
}

fn check_buffer<A: HalApi>(
    device: &Device<A>,
    buffer: &Buffer<A>,
    usage: BufferUsages,
) -> Result<(), TransferError> {
    buffer.same_device(device)?;
    buffer.raw_for_use()?;
    buffer.check_usage(usage)?;
    Ok(())
}

fn check_buffer_range(
    buffer_size: BufferAddress,
    offset: BufferAddress,
    size: BufferAddress,
    side: CopySide,
) -> Result<(), TransferError> {
    match offset.checked_add(size) {
        Some(end) if end <= buffer_size => Ok(()),
        end => Err(TransferError::BufferOverrun {
            start_offset: offset,
            end_offset: end.unwrap_or(BufferAddress::MAX),
            buffer_size,
            side,
        }),
    }
}

pub(super) fn validate_clear_buffer<A: HalApi>(
    device: &Device<A>,
    dst: &Buffer<A>,
    offset: BufferAddress,
    size: Option<BufferAddress>,
) -> Result<hal::MemoryRange, TransferError> {
    check_buffer(device, dst, BufferUsages::COPY_DST)?;

    if offset % COPY_BUFFER_ALIGNMENT != 0 {
        return Err(TransferError::UnalignedCopyOffset(offset));
    }
    let size = size.unwrap_or(dst.size.saturating_sub(offset));
    if size % COPY_BUFFER_ALIGNMENT != 0 {
        return Err(TransferError::UnalignedCopySize(size));
    }
    check_buffer_range(dst.size, offset, size, CopySide::Destination)?;
    Ok(offset..offset + size)
}

/// Check a linear texture data layout against the buffer holding it.
///
/// Returns the number of bytes the copy touches, starting at
/// `layout.offset`.
pub(crate) fn validate_linear_texture_data(
    layout: &wgt::ImageDataLayout,
    block_size: u32,
    buffer_size: BufferAddress,
    buffer_side: CopySide,
    copy_size: &Extent3d,
) -> Result<BufferAddress, TransferError> {
    let copy_width = copy_size.width as BufferAddress;
    let copy_height = copy_size.height as BufferAddress;
    let copy_depth = copy_size.depth_or_array_layers as BufferAddress;
    let block_size = block_size as BufferAddress;

    let row_size = copy_width * block_size;

    if let Some(bytes_per_row) = layout.bytes_per_row {
        if bytes_per_row % wgt::COPY_BYTES_PER_ROW_ALIGNMENT != 0 {
            return Err(TransferError::UnalignedBytesPerRow(bytes_per_row));
        }
        if (bytes_per_row as BufferAddress) < row_size {
            return Err(TransferError::InvalidBytesPerRow {
                bytes_per_row,
                row_size,
            });
        }
    } else if copy_height > 1 || copy_depth > 1 {
        return Err(TransferError::UnspecifiedBytesPerRow);
    }

    let rows_per_image = match layout.rows_per_image {
        Some(rows_per_image) => {
            if rows_per_image < copy_size.height {
                return Err(TransferError::InvalidRowsPerImage {
                    rows_per_image,
                    height: copy_size.height,
                });
            }
            rows_per_image as BufferAddress
        }
        None if copy_depth > 1 => return Err(TransferError::UnspecifiedRowsPerImage),
        None => copy_height,
    };

    if layout.offset % block_size != 0 {
        return Err(TransferError::UnalignedBufferOffset(layout.offset));
    }

    let bytes_per_row = layout
        .bytes_per_row
        .map_or(row_size, BufferAddress::from);
    let required_bytes_in_copy = if copy_width == 0 || copy_height == 0 || copy_depth == 0 {
        0
    } else {
        let bytes_per_image = bytes_per_row * rows_per_image;
        bytes_per_image * (copy_depth - 1) + bytes_per_row * (copy_height - 1) + row_size
    };

    check_buffer_range(
        buffer_size,
        layout.offset,
        required_bytes_in_copy,
        buffer_side,
    )?;
    Ok(required_bytes_in_copy)
}

/// Check that the copy stays inside the selected mip level, following the
/// [valid texture copy range] rules.
///
/// [valid texture copy range]: https://gpuweb.github.io/gpuweb/#valid-texture-copy-range
pub(crate) fn validate_texture_copy_range<A: HalApi>(
    copy: &ImageCopyTexture<A>,
    side: CopySide,
    copy_size: &Extent3d,
) -> Result<(), TransferError> {
    let desc = &copy.texture.desc;
    if copy.mip_level >= desc.mip_level_count {
        return Err(TransferError::InvalidMipLevel {
            texture: copy.texture.error_ident(),
            requested: copy.mip_level,
            count: desc.mip_level_count,
        });
    }
    let extent = desc.size.mip_level_size(copy.mip_level, desc.dimension);

    let check_dimension = |dimension, start_offset: u32, size: u32, texture_size: u32| {
        match start_offset.checked_add(size) {
            Some(end_offset) if end_offset <= texture_size => Ok(()),
            end_offset => Err(TransferError::TextureOverrun {
                start_offset,
                end_offset: end_offset.unwrap_or(u32::MAX),
                texture_size,
                dimension,
                side,
            }),
        }
    };
    check_dimension(
        TextureErrorDimension::X,
        copy.origin.x,
        copy_size.width,
        extent.width,
    )?;
    check_dimension(
        TextureErrorDimension::Y,
        copy.origin.y,
        copy_size.height,
        extent.height,
    )?;
    check_dimension(
        TextureErrorDimension::Z,
        copy.origin.z,
        copy_size.depth_or_array_layers,
        extent.depth_or_array_layers,
    )?;
    Ok(())
}

/// Validate the texture side of a copy and build its backend description.
///
/// Returns the texel block size of the copied aspect.
fn validate_texture_side<A: HalApi>(
    device: &Device<A>,
    copy: &ImageCopyTexture<A>,
    side: CopySide,
    copy_size: &Extent3d,
) -> Result<(u32, hal::TextureCopyBase), TransferError> {
    let texture = copy.texture;
    texture.same_device(device)?;
    texture.try_raw()?;
    texture.check_destroyed()?;
    texture.check_usage(match side {
        CopySide::Source => TextureUsages::COPY_SRC,
        CopySide::Destination => TextureUsages::COPY_DST,
    })?;
    if texture.desc.sample_count > 1 {
        return Err(TransferError::MultisampledCopy(texture.error_ident()));
    }

    let format = texture.desc.format;
    let aspects = hal::FormatAspects::new(format, copy.aspect);
    if aspects.is_empty() {
        return Err(TransferError::InvalidTextureAspect {
            format,
            aspect: copy.aspect,
        });
    }
    if aspects.bits().count_ones() != 1 {
        return Err(TransferError::CopyAspectNotOne {
            format,
            aspect: copy.aspect,
        });
    }
    let forbidden = || match side {
        CopySide::Source => TransferError::CopyFromForbiddenTextureFormat {
            format,
            aspect: copy.aspect,
        },
        CopySide::Destination => TransferError::CopyToForbiddenTextureFormat {
            format,
            aspect: copy.aspect,
        },
    };
    let block_size = format.block_copy_size(Some(copy.aspect)).ok_or_else(forbidden)?;
    if side == CopySide::Destination
        && format == wgt::TextureFormat::Depth32Float
        && aspects.contains(hal::FormatAspects::DEPTH)
    {
        return Err(forbidden());
    }

    validate_texture_copy_range(copy, side, copy_size)?;

    let (array_layer, origin_z) = match texture.desc.dimension {
        wgt::TextureDimension::D3 => (0, copy.origin.z),
        wgt::TextureDimension::D1 | wgt::TextureDimension::D2 => (copy.origin.z, 0),
    };
    let base = hal::TextureCopyBase {
        mip_level: copy.mip_level,
        array_layer,
        origin: wgt::Origin3d {
            z: origin_z,
            ..copy.origin
        },
        aspect: aspects,
    };
    Ok((block_size, base))
}

impl<A: HalApi> CommandEncoder<A> {
    pub fn copy_buffer_to_buffer(
        &self,
        src: &Arc<Buffer<A>>,
        src_offset: BufferAddress,
        dst: &Arc<Buffer<A>>,
        dst_offset: BufferAddress,
        size: BufferAddress,
    ) -> Result<(), CopyError> {
        profiling::scope!("CommandEncoder::copy_buffer_to_buffer");
        api_log!(
            "CommandEncoder::copy_buffer_to_buffer {:?} -> {:?} {size}b",
            src.label,
            dst.label
        );

        self.record("CommandEncoder::copy_buffer_to_buffer", |data| {
            if Arc::ptr_eq(src, dst) {
                return Err(TransferError::SameSourceDestinationBuffer.into());
            }
            check_buffer(&self.device, src, BufferUsages::COPY_SRC)?;
            check_buffer(&self.device, dst, BufferUsages::COPY_DST)?;

            if size % COPY_BUFFER_ALIGNMENT != 0 {
                return Err(TransferError::UnalignedCopySize(size).into());
            }
            if src_offset % COPY_BUFFER_ALIGNMENT != 0 {
                return Err(TransferError::UnalignedCopyOffset(src_offset).into());
            }
            if dst_offset % COPY_BUFFER_ALIGNMENT != 0 {
                return Err(TransferError::UnalignedCopyOffset(dst_offset).into());
            }
            check_buffer_range(src.size, src_offset, size, CopySide::Source)?;
            check_buffer_range(dst.size, dst_offset, size, CopySide::Destination)?;

            let size = match wgt::BufferSize::new(size) {
                Some(size) => size,
                None => {
                    log::trace!("Ignoring copy_buffer_to_buffer of size 0");
                    return Ok(());
                }
            };
            data.use_buffer(src);
            data.use_buffer(dst);
            data.commands.push(Command::CopyBufferToBuffer {
                src: Arc::clone(src),
                dst: Arc::clone(dst),
                region: hal::BufferCopy {
                    src_offset,
                    dst_offset,
                    size,
                },
            });
            Ok(())
        })
    }

    pub fn copy_buffer_to_texture(
        &self,
        source: &ImageCopyBuffer<A>,
        destination: &ImageCopyTexture<A>,
        copy_size: &Extent3d,
    ) -> Result<(), CopyError> {
        profiling::scope!("CommandEncoder::copy_buffer_to_texture");
        api_log!(
            "CommandEncoder::copy_buffer_to_texture {:?} -> {:?} {copy_size:?}",
            source.buffer.label,
            destination.texture.label
        );

        self.record("CommandEncoder::copy_buffer_to_texture", |data| {
            let (block_size, texture_base) =
                validate_texture_side(&self.device, destination, CopySide::Destination, copy_size)?;
            check_buffer(&self.device, source.buffer, BufferUsages::COPY_SRC)?;
            validate_linear_texture_data(
                &source.layout,
                block_size,
                source.buffer.size,
                CopySide::Source,
                copy_size,
            )?;

            if copy_size.width == 0 || copy_size.height == 0 || copy_size.depth_or_array_layers == 0
            {
                log::trace!("Ignoring copy_buffer_to_texture of size 0");
                return Ok(());
            }
            data.use_buffer(source.buffer);
            data.commands.push(Command::CopyBufferToTexture {
                src: Arc::clone(source.buffer),
                dst: Arc::clone(destination.texture),
                region: hal::BufferTextureCopy {
                    buffer_layout: source.layout,
                    texture_base,
                    size: *copy_size,
                },
            });
            Ok(())
        })
    }

    pub fn copy_texture_to_buffer(
        &self,
        source: &ImageCopyTexture<A>,
        destination: &ImageCopyBuffer<A>,
        copy_size: &Extent3d,
    ) -> Result<(), CopyError> {
        profiling::scope!("CommandEncoder::copy_texture_to_buffer");
        api_log!(
            "CommandEncoder::copy_texture_to_buffer {:?} -> {:?} {copy_size:?}",
            source.texture.label,
            destination.buffer.label
        );

        self.record("CommandEncoder::copy_texture_to_buffer", |data| {
            let (block_size, texture_base) =
                validate_texture_side(&self.device, source, CopySide::Source, copy_size)?;
            check_buffer(&self.device, destination.buffer, BufferUsages::COPY_DST)?;
            validate_linear_texture_data(
                &destination.layout,
                block_size,
                destination.buffer.size,
                CopySide::Destination,
                copy_size,
            )?;

            if copy_size.width == 0 || copy_size.height == 0 || copy_size.depth_or_array_layers == 0
            {
                log::trace!("Ignoring copy_texture_to_buffer of size 0");
                return Ok(());
            }
            data.use_buffer(destination.buffer);
            data.commands.push(Command::CopyTextureToBuffer {
                src: Arc::clone(source.texture),
                dst: Arc::clone(destination.buffer),
                region: hal::BufferTextureCopy {
                    buffer_layout: destination.layout,
                    texture_base,
                    size: *copy_size,
                },
            });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32, depth_or_array_layers: u32) -> Extent3d {
        Extent3d {
            width,
            height,
            depth_or_array_layers,
        }
    }

    fn layout(bytes_per_row: Option<u32>, rows_per_image: Option<u32>) -> wgt::ImageDataLayout {
        wgt::ImageDataLayout {
            offset: 0,
            bytes_per_row,
            rows_per_image,
        }
    }

    #[test]
    fn bytes_per_row_must_be_aligned_and_large_enough() {
        let size = extent(256, 256, 1);
        assert!(matches!(
            validate_linear_texture_data(&layout(Some(800), None), 4, 1 << 20, CopySide::Destination, &size),
            Err(TransferError::UnalignedBytesPerRow(800))
        ));
        assert!(matches!(
            validate_linear_texture_data(&layout(Some(768), None), 4, 1 << 20, CopySide::Destination, &size),
            Err(TransferError::InvalidBytesPerRow {
                bytes_per_row: 768,
                row_size: 1024
            })
        ));
        assert_eq!(
            validate_linear_texture_data(&layout(Some(1024), None), 4, 1 << 20, CopySide::Destination, &size)
                .unwrap(),
            1024 * 256
        );
    }

    #[test]
    fn required_bytes_skip_the_last_row_padding() {
        // Two images of three rows, 8 bytes used per 256-byte row.
        let size = extent(2, 3, 2);
        let layout = layout(Some(256), Some(4));
        let required =
            validate_linear_texture_data(&layout, 4, 1 << 20, CopySide::Source, &size).unwrap();
        assert_eq!(required, 256 * 4 + 256 * 2 + 8);
        assert!(matches!(
            validate_linear_texture_data(&layout, 4, required - 1, CopySide::Source, &size),
            Err(TransferError::BufferOverrun {
                side: CopySide::Source,
                ..
            })
        ));
    }

    #[test]
    fn single_rows_need_no_layout() {
        assert_eq!(
            validate_linear_texture_data(&layout(None, None), 4, 64, CopySide::Source, &extent(16, 1, 1))
                .unwrap(),
            64
        );
        assert!(matches!(
            validate_linear_texture_data(&layout(None, None), 4, 1 << 20, CopySide::Source, &extent(16, 2, 1)),
            Err(TransferError::UnspecifiedBytesPerRow)
        ));
        assert!(matches!(
            validate_linear_texture_data(&layout(Some(256), None), 4, 1 << 20, CopySide::Source, &extent(16, 2, 2)),
            Err(TransferError::UnspecifiedRowsPerImage)
        ));
        assert!(matches!(
            validate_linear_texture_data(&layout(Some(256), Some(1)), 4, 1 << 20, CopySide::Source, &extent(16, 2, 1)),
            Err(TransferError::InvalidRowsPerImage {
                rows_per_image: 1,
                height: 2
            })
        ));
    }

    #[test]
    fn buffer_ranges_detect_overflow() {
        assert!(check_buffer_range(16, 8, 8, CopySide::Source).is_ok());
        assert!(matches!(
            check_buffer_range(16, 12, 8, CopySide::Destination),
            Err(TransferError::BufferOverrun {
                end_offset: 20,
                ..
            })
        ));
        assert!(matches!(
            check_buffer_range(16, u64::MAX, 8, CopySide::Source),
            Err(TransferError::BufferOverrun {
                end_offset: u64::MAX,
                ..
            })
        ));
    }
}
