mod common;

use labscenes::input_map::InputMap;
use labscenes::scene::mandelbrot::{shade, ImageSize, MandelbrotScene};
use labscenes::scene::overlay::OverlayScene;
use labscenes::scene::{DemoScene, Scene, SceneKind, SceneSettings};
use labscenes::time::Time;
use labscenes::vulkan::{SurfaceFrame, SwapchainIndex};

use common::{contents, software_context, SURFACE_IMAGES};

#[test]
fn mandelbrot_pixels_match_the_reference_shading() {
    let (device, context) = software_context(40, 24);
    let scene = MandelbrotScene::new(&context).unwrap();
    let size = ImageSize {
        width: 40,
        height: 24,
    };

    let pixels = contents::<[f32; 4]>(&device, scene.pixels().id());

    assert_eq!(pixels.len(), 40 * 24);
    for y in 0..size.height {
        for x in 0..size.width {
            assert_eq!(pixels[(y * size.width + x) as usize], shade(x, y, size), "({x}, {y})");
        }
    }
    // Computed once, up front
    assert_eq!(device.pending_submissions(), 0);
}

#[test]
fn mandelbrot_pixels_are_acquired_on_the_graphics_queue() {
    let (device, context) = software_context(16, 16);
    let scene = MandelbrotScene::new(&context).unwrap();

    assert_eq!(device.stats().graphics_barriers_on_compute, 0);
    for index in 0..SURFACE_IMAGES {
        let names = scene.pass().recorded(SwapchainIndex::new(index)).names();
        assert_eq!(&names[..2], &["pipeline_barrier", "begin_render_pass"]);
    }
}

#[test]
fn prerecorded_frames_are_replayed_unchanged() {
    let (device, context) = software_context(16, 16);
    let mut scene = MandelbrotScene::new(&context).unwrap();
    let before: Vec<String> = (0..SURFACE_IMAGES)
        .map(|index| format!("{:?}", scene.pass().recorded(SwapchainIndex::new(index))))
        .collect();

    for _ in 0..5 {
        let frame = context.surface().acquire_next_frame().unwrap();
        scene.update(&InputMap::new(), &Time::new()).unwrap();
        scene.render(&frame);
        context.surface().present(&frame).unwrap();
        assert!(frame.index.get() < SURFACE_IMAGES);
    }
    scene.cleanup();

    let after: Vec<String> = (0..SURFACE_IMAGES)
        .map(|index| format!("{:?}", scene.pass().recorded(SwapchainIndex::new(index))))
        .collect();
    assert_eq!(before, after);
    let stats = device.stats();
    assert_eq!(stats.render_passes, 5);
    assert_eq!(stats.draw_calls, 5);
    assert_eq!(stats.presents, 5);
}

#[test]
fn overlay_records_only_the_frame_being_rendered() {
    let (device, context) = software_context(320, 240);
    let mut overlay = OverlayScene::new(&context).unwrap();

    overlay.update(&InputMap::new(), &Time::new()).unwrap();
    overlay.render(&SurfaceFrame::unsynchronized(1));
    overlay.cleanup();

    assert!(overlay.draw_count() > 0);
    let names = overlay.pass().recorded(SwapchainIndex::new(1)).names();
    assert_eq!(names.first(), Some(&"begin_render_pass"));
    assert_eq!(names.last(), Some(&"end_render_pass"));
    assert_eq!(
        names.iter().filter(|name| **name == "draw_indexed").count(),
        overlay.draw_count()
    );
    assert!(overlay.pass().recorded(SwapchainIndex::new(0)).is_empty());
    assert!(overlay.pass().recorded(SwapchainIndex::new(2)).is_empty());
    assert_eq!(device.stats().draw_calls, overlay.draw_count() as u64);
}

#[test]
fn overlay_rerecords_on_every_frame() {
    let (_device, context) = software_context(320, 240);
    let mut overlay = OverlayScene::new(&context).unwrap();
    let mut time = Time::new();

    for _ in 0..2 {
        time.advance(std::time::Duration::from_millis(16));
        overlay.update(&InputMap::new(), &time).unwrap();
        overlay.render(&SurfaceFrame::unsynchronized(0));
    }
    overlay.cleanup();

    let names = overlay.pass().recorded(SwapchainIndex::new(0)).names();
    assert!(names.contains(&"draw_indexed"));
    assert!(overlay.pass().recorded(SwapchainIndex::new(1)).is_empty());
}

#[test]
fn every_scene_kind_initializes_and_renders() {
    let (device, context) = software_context(32, 32);
    let settings = SceneSettings {
        sph_particle_count: 256,
    };

    for kind in SceneKind::ALL {
        let mut scene = DemoScene::init(kind, &context, &settings).unwrap();
        assert_eq!(scene.kind(), kind);
        let frame = context.surface().acquire_next_frame().unwrap();
        scene.update(&InputMap::new(), &Time::new()).unwrap();
        scene.render(&frame);
        context.surface().present(&frame).unwrap();
        scene.cleanup();
    }

    assert_eq!(device.stats().presents, SceneKind::ALL.len() as u64);
    assert_eq!(device.stats().invalid_accesses, 0);
    assert_eq!(device.stats().graphics_barriers_on_compute, 0);
}
