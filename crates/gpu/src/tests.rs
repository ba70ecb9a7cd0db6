use crate::{GpuResourceError, GpuSurface, KernelLibrary, PassTarget, blur_iteration_count};
use model::Bitmap;

#[test]
fn blur_iteration_count_follows_sigma_hint() {
    assert_eq!(blur_iteration_count(0.0), 1);
    assert_eq!(blur_iteration_count(1.0), 1);
    assert_eq!(blur_iteration_count(3.0), 1);
    assert_eq!(blur_iteration_count(5.0), 2);
    assert_eq!(blur_iteration_count(9.0), 3);
    assert_eq!(blur_iteration_count(18.0), 6);
    assert_eq!(blur_iteration_count(100.0), 6);
}

#[test]
fn surface_creation_rejects_zero_dimensions() {
    assert!(GpuSurface::create(0, 32).is_none());
    assert!(GpuSurface::create(32, 0).is_none());
}

#[test]
fn render_target_delete_then_recreate_succeeds() {
    let Some(surface) = GpuSurface::create(16, 16) else {
        return;
    };

    let first = surface
        .create_render_target(16, 16)
        .expect("create first render target");
    surface.delete_render_target(first);
    let second = surface
        .create_render_target(16, 16)
        .expect("recreate render target after delete");
    surface.delete_render_target(second);
}

#[test]
fn texture_creation_validates_dimensions_and_data_length() {
    let Some(surface) = GpuSurface::create(8, 8) else {
        return;
    };

    assert_eq!(
        surface.create_texture(0, 8, None).unwrap_err(),
        GpuResourceError::ZeroDimension
    );
    let short_data = vec![0u8; 8];
    assert_eq!(
        surface.create_texture(4, 4, Some(&short_data)).unwrap_err(),
        GpuResourceError::DimensionMismatch
    );
}

#[test]
fn backing_upload_readback_round_trips_with_padded_rows() {
    // Width 3 forces readback rows to be padded to the 256-byte alignment.
    let Some(mut surface) = GpuSurface::create(3, 5) else {
        return;
    };

    let mut bitmap = Bitmap::new(3, 5).expect("create upload bitmap");
    for y in 0..5 {
        for x in 0..3 {
            bitmap
                .put_pixel(x, y, [x as u8 * 40, y as u8 * 30, 200, 255])
                .expect("fill upload bitmap");
        }
    }
    surface
        .write_backing_pixels(&bitmap)
        .expect("upload backing pixels");
    let read_back = surface.read_backing_pixels().expect("read backing pixels");
    assert_eq!(read_back.pixels(), bitmap.pixels());

    surface.resize(4, 4).expect("resize backing surface");
    assert_eq!(
        surface.write_backing_pixels(&bitmap).unwrap_err(),
        GpuResourceError::DimensionMismatch
    );
}

#[test]
fn broken_shader_source_reports_diagnostic() {
    let Some(surface) = GpuSurface::create(8, 8) else {
        return;
    };

    let error = surface
        .compile_program("tests.broken", "@fragment fn fs_main( -> {")
        .expect_err("broken WGSL must fail to compile");
    assert!(!error.message.is_empty());
}

#[test]
fn blit_copies_source_onto_backing() {
    let Some(surface) = GpuSurface::create(8, 8) else {
        return;
    };
    let kernels = KernelLibrary::compile(&surface).expect("compile kernel library");

    let source_pixels = vec![[10u8, 220, 60, 255]; 64]
        .into_iter()
        .flatten()
        .collect::<Vec<u8>>();
    let source = surface
        .create_texture(8, 8, Some(&source_pixels))
        .expect("create blit source");
    kernels.blit(&surface, &source, PassTarget::Backing);
    let result = surface.read_backing_pixels().expect("read blit result");
    for pixel in result.pixels().chunks_exact(4) {
        assert_eq!(pixel, [10, 220, 60, 255]);
    }
    surface.delete_texture(source);
}

#[test]
fn blur_leaves_uniform_color_unchanged() {
    let Some(surface) = GpuSurface::create(16, 16) else {
        return;
    };
    let kernels = KernelLibrary::compile(&surface).expect("compile kernel library");

    let uniform_pixels = vec![[100u8, 150, 200, 255]; 256]
        .into_iter()
        .flatten()
        .collect::<Vec<u8>>();
    let input = surface
        .create_texture(16, 16, Some(&uniform_pixels))
        .expect("create blur input");
    let ping = surface
        .create_render_target(16, 16)
        .expect("create blur ping target");
    let pong = surface
        .create_render_target(16, 16)
        .expect("create blur pong target");

    kernels.blur(&surface, &input, &ping, &pong, 9.0);
    let read_back = surface
        .read_target_pixels(&pong)
        .expect("read blur result");
    for pixel in read_back.pixels().chunks_exact(4) {
        for (channel, expected) in pixel.iter().zip([100u8, 150, 200, 255]) {
            assert!(
                channel.abs_diff(expected) <= 2,
                "blurred uniform color drifted: got {pixel:?}"
            );
        }
    }

    surface.delete_texture(input);
    surface.delete_render_target(ping);
    surface.delete_render_target(pong);
}

#[test]
fn sobel_normal_of_flat_input_is_straight_up() {
    let Some(surface) = GpuSurface::create(8, 8) else {
        return;
    };
    let kernels = KernelLibrary::compile(&surface).expect("compile kernel library");

    let flat_pixels = vec![[128u8, 128, 128, 255]; 64]
        .into_iter()
        .flatten()
        .collect::<Vec<u8>>();
    let input = surface
        .create_texture(8, 8, Some(&flat_pixels))
        .expect("create sobel input");
    let target = surface
        .create_render_target(8, 8)
        .expect("create sobel target");

    kernels.sobel_normal(&surface, &input, &target);
    let read_back = surface
        .read_target_pixels(&target)
        .expect("read sobel result");
    for pixel in read_back.pixels().chunks_exact(4) {
        // Zero gradient maps to the neutral (0.5, 0.5, 1.0) normal.
        assert!(pixel[0].abs_diff(128) <= 2, "normal x drifted: {pixel:?}");
        assert!(pixel[1].abs_diff(128) <= 2, "normal y drifted: {pixel:?}");
        assert!(pixel[2] >= 253, "normal z drifted: {pixel:?}");
        assert_eq!(pixel[3], 255);
    }

    surface.delete_texture(input);
    surface.delete_render_target(target);
}
