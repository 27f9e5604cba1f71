use super::*;
use crate::atlas::gpu::CommandRecorder;

fn barrier(image: ImageHandle, old: ImageLayout, new: ImageLayout) -> GpuCommand {
    GpuCommand::ImageBarrier {
        image,
        old,
        new,
        layer_count: 1,
    }
}

#[test]
fn buffer_to_image_copy_lands_at_the_offset() {
    let mut dev = HeadlessDevice::new();
    let img = dev.create_image(8, 2).unwrap();
    let mut staging = SharedStagingBuffer::new(64).unwrap();
    let off = staging.allocate(8, 4).unwrap();
    staging.write(off, &[1, 2, 3, 4, 5, 6, 7, 8]);

    let mut list = CommandList::new();
    list.record(barrier(img, ImageLayout::Undefined, ImageLayout::TransferDst));
    list.record(GpuCommand::CopyBufferToImage {
        staging_offset: off,
        dst: img,
        layer: 1,
        x: 3,
        y: 5,
        width: 2,
        height: 1,
    });
    dev.submit(&list, &staging).unwrap();

    assert_eq!(dev.read_texel(img, 1, 3, 5), Some([1, 2, 3, 4]));
    assert_eq!(dev.read_texel(img, 1, 4, 5), Some([5, 6, 7, 8]));
    assert_eq!(dev.read_texel(img, 0, 3, 5), Some([0; 4]));
    assert_eq!(dev.read_texel(img, 2, 0, 0), None);
    assert_eq!(dev.image_layout(img), Some(ImageLayout::TransferDst));
}

#[test]
fn copies_check_layouts() {
    let mut dev = HeadlessDevice::new();
    let img = dev.create_image(4, 1).unwrap();
    let staging = SharedStagingBuffer::new(64).unwrap();
    let mut list = CommandList::new();
    list.record(GpuCommand::CopyBufferToImage {
        staging_offset: 0,
        dst: img,
        layer: 0,
        x: 0,
        y: 0,
        width: 1,
        height: 1,
    });
    let err = dev.submit(&list, &staging).unwrap_err();
    assert!(matches!(err, GpuError::Validation(_)));

    list.clear();
    list.record(barrier(img, ImageLayout::TransferSrc, ImageLayout::TransferDst));
    assert!(dev.submit(&list, &staging).is_err());
}

#[test]
fn image_copy_preserves_contents_into_a_larger_image() {
    let mut dev = HeadlessDevice::new();
    let small = dev.create_image(4, 1).unwrap();
    let big = dev.create_image(8, 2).unwrap();
    let mut staging = SharedStagingBuffer::new(64).unwrap();
    staging.write(0, &[9, 9, 9, 255]);

    let mut list = CommandList::new();
    list.record(barrier(small, ImageLayout::Undefined, ImageLayout::TransferDst));
    list.record(GpuCommand::CopyBufferToImage {
        staging_offset: 0,
        dst: small,
        layer: 0,
        x: 3,
        y: 3,
        width: 1,
        height: 1,
    });
    list.record(barrier(small, ImageLayout::TransferDst, ImageLayout::TransferSrc));
    list.record(barrier(big, ImageLayout::Undefined, ImageLayout::TransferDst));
    list.record(GpuCommand::CopyImage {
        src: small,
        dst: big,
        extent: 4,
        layer_count: 1,
    });
    dev.submit(&list, &staging).unwrap();
    assert_eq!(dev.read_texel(big, 0, 3, 3), Some([9, 9, 9, 255]));
    assert_eq!(dev.read_texel(big, 0, 7, 7), Some([0; 4]));
}

#[test]
fn memory_limit_fails_image_creation() {
    let mut dev = HeadlessDevice::with_memory_limit(4 * 4 * 4);
    let a = dev.create_image(4, 1).unwrap();
    assert_eq!(
        dev.create_image(4, 1),
        Err(GpuError::OutOfMemory { bytes: 64 })
    );
    dev.destroy_image(a);
    assert_eq!(dev.live_image_count(), 0);
    dev.create_image(4, 1).unwrap();
}

#[test]
fn clones_share_resources() {
    let dev = HeadlessDevice::with_alignment(16);
    let mut boxed: Box<dyn GpuDevice> = Box::new(dev.clone());
    assert_eq!(boxed.copy_offset_alignment(), 16);
    let img = boxed.create_image(4, 1).unwrap();
    assert_eq!(dev.image_extent(img), Some((4, 1)));
    assert_eq!(dev.live_image_count(), 1);
}

#[test]
fn entries_buffer_reads_back() {
    let mut dev = HeadlessDevice::new();
    let buf = dev.create_buffer(64).unwrap();
    let e = Entry {
        uv_min_max: [0.25, 0.5, 0.75, 1.0],
        layer: 3,
        flags: 1,
        pad: [0; 2],
    };
    let mut staging = SharedStagingBuffer::new(64).unwrap();
    staging.write(0, &e.to_bytes());

    let mut list = CommandList::new();
    list.record(GpuCommand::CopyBuffer {
        staging_offset: 0,
        dst: buf,
        bytes: 32,
    });
    list.record(GpuCommand::BufferBarrier { buffer: buf });
    dev.submit(&list, &staging).unwrap();

    let entries = dev.read_entries(buf).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0], e);
    assert_eq!(entries[1], Entry::default());
}
