use std::sync::Arc;
use std::thread;

use render_core::{
    Buffer, BufferUsage, RenderConfig, RenderManager, Resource, ResourceKind, Texture,
};

#[test]
fn ids_are_unique_and_never_reused() {
    let manager = RenderManager::new(RenderConfig::default());
    let a = Texture::new(&manager);
    let a_id = a.id();
    drop(a);
    let b = Texture::new(&manager);
    let c = Buffer::new(&manager, BufferUsage::Static);
    assert_ne!(a_id, b.id());
    assert_ne!(b.id(), c.id());
    assert!(b.id() < c.id());
}

#[test]
fn lookup_checks_the_type() {
    let manager = RenderManager::new(RenderConfig::default());
    let tex = Texture::new(&manager);
    assert!(manager.get::<Buffer>(tex.id()).is_none());
    assert_eq!(manager.kind_of(tex.id()), Some(ResourceKind::Texture));
    let found = manager.get::<Texture>(tex.id()).unwrap();
    assert!(Arc::ptr_eq(&found, &tex));
}

#[test]
fn concurrent_drop_and_lookup_never_yield_dangling_descriptors() {
    let manager = RenderManager::new(RenderConfig::default());
    let textures: Vec<_> = (0..64).map(|_| Texture::new(&manager)).collect();
    let ids: Vec<_> = textures.iter().map(|t| t.id()).collect();

    let reader = {
        let manager = manager.clone();
        let ids = ids.clone();
        thread::spawn(move || {
            for _ in 0..100 {
                for id in &ids {
                    if let Some(tex) = manager.get::<Texture>(*id) {
                        assert_eq!(tex.id(), *id);
                    }
                }
            }
        })
    };
    drop(textures);
    reader.join().unwrap();
    assert_eq!(manager.resource_count(), 0);
}

#[test]
fn process_wide_instance_has_explicit_lifecycle() {
    let manager = RenderManager::new(RenderConfig::default());
    RenderManager::install(manager.clone());
    let global = RenderManager::global().unwrap();
    assert!(Arc::ptr_eq(&global, &manager));

    let t0 = manager.frame_number();
    manager.set_frame_time(500);
    assert_eq!(manager.frame_time(), 500);
    assert!(manager.update_frame_time() >= 500);
    assert_eq!(manager.frame_number(), t0 + 2);

    assert!(RenderManager::shutdown().is_some());
    assert!(RenderManager::global().is_none());
}
