use glam::{Affine3A, Vec3};
use strata_common::TriMesh;
use strata_navmesh::tile::{POLY_FLAG_DISABLED, POLY_FLAG_WALK};
use strata_navmesh::{
    BakeConfig, GeometryInstance, Link, NavMesh, NavMeshError, PolyRef, QueryFilter,
};

const EXTENTS: Vec3 = Vec3::new(2.0, 4.0, 2.0);

fn bake(mesh: &TriMesh) -> NavMesh {
    let instances = [GeometryInstance {
        mesh,
        transform: Affine3A::IDENTITY,
    }];
    NavMesh::bake_all(&instances, &BakeConfig::default()).unwrap()
}

fn plane(size: f32) -> NavMesh {
    bake(&TriMesh::quad(0.0, 0.0, size, size, 0.0))
}

fn nearest(mesh: &NavMesh, p: Vec3) -> (PolyRef, Vec3) {
    mesh.find_nearest_poly(p, EXTENTS, &QueryFilter::default())
        .expect("point on mesh")
}

#[test]
fn plane_spanning_tiles_gets_portal_links() {
    let mesh = plane(30.0);
    assert!(mesh.tile_count() > 1);

    let mut portals = 0;
    for (_, tile) in mesh.tiles() {
        for poly in 0..tile.data.polys.len() {
            for link in tile.links(poly) {
                if link.side != Link::INTERNAL {
                    portals += 1;
                    let back = mesh.links(link.target);
                    assert!(!back.is_empty());
                }
            }
        }
    }
    assert!(portals > 0);
}

#[test]
fn bake_all_is_deterministic() {
    let a = plane(30.0);
    let b = plane(30.0);
    let bytes_a: Vec<_> = a.tiles().map(|(_, t)| t.bytes().to_vec()).collect();
    let bytes_b: Vec<_> = b.tiles().map(|(_, t)| t.bytes().to_vec()).collect();
    assert_eq!(bytes_a, bytes_b);
}

#[test]
fn nearest_poly_snaps_to_surface() {
    let mesh = plane(30.0);
    let (r, p) = nearest(&mesh, Vec3::new(10.0, 1.0, 10.0));
    assert!(!r.is_null());
    assert!((p.x - 10.0).abs() < 1e-4);
    assert!(p.y.abs() < 0.5);

    let h = mesh.poly_height(r, Vec3::new(10.0, 0.0, 10.0)).unwrap();
    assert!(h.abs() < 0.5);
}

#[test]
fn nearest_point_respects_radius() {
    let mesh = plane(30.0);
    let filter = QueryFilter::default();
    assert!(mesh.query_nearest_point(Vec3::new(15.0, 0.0, 15.0), 1.0, &filter).is_some());
    assert!(mesh.query_nearest_point(Vec3::new(80.0, 0.0, 80.0), 1.0, &filter).is_none());
}

#[test]
fn path_crosses_tiles_and_pulls_straight() {
    let mesh = plane(30.0);
    let filter = QueryFilter::default();
    let start = Vec3::new(3.0, 0.0, 3.0);
    let end = Vec3::new(27.0, 0.0, 27.0);
    let (s, sp) = nearest(&mesh, start);
    let (e, ep) = nearest(&mesh, end);
    assert_ne!(mesh.calc_tile_loc(sp), mesh.calc_tile_loc(ep));

    let path = mesh.find_path(s, e, sp, ep, &filter).unwrap();
    assert!(path.complete);
    assert_eq!(path.polys.first(), Some(&s));
    assert_eq!(path.polys.last(), Some(&e));
    for w in path.polys.windows(2) {
        assert!(mesh.links(w[0]).iter().any(|l| l.target == w[1]));
    }

    let pts = mesh.find_straight_path(sp, ep, &path.polys, 32).unwrap();
    assert_eq!(pts.len(), 2, "open plane needs no corners: {pts:?}");
    assert!(pts[0].distance(sp) < 1e-3);
    assert!(pts[1].distance(ep) < 1e-3);
}

#[test]
fn path_to_disconnected_island_is_partial() {
    let mut geometry = TriMesh::quad(0.0, 0.0, 10.0, 10.0, 0.0);
    geometry.append(&TriMesh::quad(20.0, 0.0, 30.0, 10.0, 0.0));
    let mesh = bake(&geometry);
    let filter = QueryFilter::default();

    let (s, sp) = nearest(&mesh, Vec3::new(5.0, 0.0, 5.0));
    let (e, ep) = nearest(&mesh, Vec3::new(25.0, 0.0, 5.0));
    let path = mesh.find_path(s, e, sp, ep, &filter).unwrap();
    assert!(!path.complete);
    assert_eq!(path.polys.first(), Some(&s));
    assert_ne!(path.polys.last(), Some(&e));
}

#[test]
fn wall_blocks_surface_move() {
    let mesh = plane(10.0);
    let filter = QueryFilter::default();
    let (r, p) = nearest(&mesh, Vec3::new(5.0, 0.0, 5.0));

    let moved = mesh
        .move_along_surface(r, p, Vec3::new(50.0, 0.0, 5.0), &filter)
        .unwrap();
    assert!(moved.pos.x < 10.0);
    assert!(moved.pos.x > 5.0);
    assert!((moved.pos.z - 5.0).abs() < 0.5);
    assert_eq!(moved.visited.first(), Some(&r));
    assert_eq!(moved.visited.last(), Some(&moved.poly));
}

#[test]
fn disabled_polys_are_filtered() {
    let mut mesh = plane(10.0);
    let (r, _) = nearest(&mesh, Vec3::new(5.0, 0.0, 5.0));
    mesh.set_poly_flags(r, POLY_FLAG_WALK | POLY_FLAG_DISABLED).unwrap();
    let found = mesh.query_polygons(Vec3::new(5.0, 0.0, 5.0), EXTENTS, &QueryFilter::default());
    assert!(!found.contains(&r));
}

#[test]
fn save_load_keeps_refs_and_links() {
    let mesh = plane(30.0);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("level.navmesh");
    mesh.save(&path).unwrap();

    let loaded = NavMesh::load(&path).unwrap();
    assert_eq!(loaded.tile_count(), mesh.tile_count());
    assert_eq!(loaded.poly_count(), mesh.poly_count());

    let (a, _) = nearest(&mesh, Vec3::new(12.0, 0.0, 12.0));
    let (b, _) = nearest(&loaded, Vec3::new(12.0, 0.0, 12.0));
    assert_eq!(a, b);
    assert_eq!(mesh.links(a).len(), loaded.links(b).len());

    assert_eq!(loaded.params(), mesh.params());
    let saved: Vec<_> = mesh.tiles().collect();
    let restored: Vec<_> = loaded.tiles().collect();
    assert_eq!(saved.len(), restored.len());
    for ((ref_a, ta), (ref_b, tb)) in saved.iter().zip(&restored) {
        assert_eq!(ref_a, ref_b);
        assert_eq!(ta.coords(), tb.coords());
        assert_eq!(ta.data.verts.len(), tb.data.verts.len());
        for (va, vb) in ta.data.verts.iter().zip(&tb.data.verts) {
            let d = Vec3::from_array(*va) - Vec3::from_array(*vb);
            assert!(d.abs().max_element() < 1e-6, "{va:?} vs {vb:?}");
        }
    }
}

#[test]
fn remove_tile_unlinks_neighbours() {
    let mut mesh = plane(30.0);
    let victim = mesh.tile_ref_at(1, 1).unwrap();
    let before = mesh.tile_count();
    let bytes = mesh.remove_tile(victim).unwrap();
    assert_eq!(mesh.tile_count(), before - 1);

    for (_, tile) in mesh.tiles() {
        for poly in 0..tile.data.polys.len() {
            for link in tile.links(poly) {
                assert!(mesh.is_valid_poly_ref(link.target));
            }
        }
    }

    mesh.add_tile(bytes).unwrap();
    assert_eq!(mesh.tile_count(), before);
    let duplicate = mesh.tile_at(0, 0).unwrap().bytes().to_vec();
    assert!(matches!(
        mesh.add_tile(duplicate),
        Err(NavMeshError::TileExists { x: 0, y: 0 })
    ));
}

#[test]
fn debug_mesh_covers_every_poly() {
    let mesh = plane(10.0);
    let debug = mesh.debug_mesh();
    assert!(debug.primitive_count() >= mesh.poly_count());
}
