use super::*;
use std::sync::Arc;

use cgmath::{Matrix4, Point3, SquareMatrix, Vector3};
use rayon::prelude::*;

use crate::common::transform_ops;
use crate::crowd::ExpandOptions;
use crate::instance::InstanceCache;
use crate::library::VariationParts;
use crate::tree::{walk_hierarchy, PathCollector};

// ========================================================================
// Fixtures
// ========================================================================

fn quad(y: f32) -> Mesh {
    Mesh::new(
        vec![
            Point3::new(-1.0, y, -1.0),
            Point3::new(1.0, y, -1.0),
            Point3::new(1.0, y, 1.0),
            Point3::new(-1.0, y, 1.0),
        ],
        vec![4],
        vec![0, 1, 2, 3],
    )
    .with_normals(vec![Vector3::unit_y(); 4])
}

fn body(y: f32) -> TemplatePart {
    TemplatePart::mesh(quad(y))
        .with_skin(SkinBinding::rigid(4, 0))
        .with_attribute("jointIndices", AttributeValue::IntArray(vec![0; 4]))
        .with_attribute("user:side", AttributeValue::String("center".into()))
        .with_set("metal")
}

fn parts(entries: Vec<(&str, TemplatePart)>) -> VariationParts {
    entries
        .into_iter()
        .map(|(name, part)| (name.to_string(), part))
        .collect()
}

/// robot:V1, its `low` LOD override and robot:V2 with a malformed part.
fn variations() -> VariationSet {
    VariationSet::new()
        .with_variation("robot", "V1", parts(vec![("body", body(0.0))]))
        .with_variation("robot", "V1:low", parts(vec![("body", body(5.0))]))
        .with_variation(
            "robot",
            "V2",
            parts(vec![
                ("body", body(0.0)),
                ("broken", TemplatePart::mesh(quad(0.0)).with_skin(SkinBinding::rigid(4, 7))),
            ]),
        )
}

fn robot(id: i64, variation: &str, x: f32, y: f32) -> AgentRecord {
    AgentRecord::new(id, "robot", variation)
        .with_root_transform(Matrix4::from_translation(Vector3::new(x, y, 0.0)))
        .with_poses(vec![Matrix4::identity()], vec![Matrix4::identity()])
        .with_metadata("testData", AttributeValue::Int(2))
}

fn crowd() -> Crowd {
    Crowd::from_records(vec![
        robot(5, "V1", 0.0, 16.0),
        robot(6, "V1", 4.0, 0.0).with_lod("low"),
        robot(7, "V1", 8.0, 0.0).with_lod("mid"),
        AgentRecord::new(8, "ghost", "V1"),
        robot(9, "V1", -4.0, 0.0),
        robot(10, "V2", 0.0, 0.0),
    ])
}

fn library() -> Arc<TemplateLibrary> {
    Arc::new(TemplateLibrary::new(Arc::new(variations()), LibraryOptions::default()))
}

fn scene_for(crowd: Crowd, options: ExpandOptions) -> CrowdScene {
    CrowdScene::new(
        Arc::new(crowd),
        library(),
        ScenePath::parse("/crowd"),
        Arc::new(InstanceCache::new()),
    )
    .with_options(options)
}

fn scene() -> CrowdScene {
    scene_for(crowd(), ExpandOptions::default())
}

fn mesh_at(scene: &CrowdScene, path: &str) -> Arc<Mesh> {
    match scene.object(&ScenePath::parse(path)).unwrap() {
        Some(SceneObject::Mesh(mesh)) => mesh,
        other => panic!("expected a mesh at {}, got {:?}", path, other.is_some()),
    }
}

// ========================================================================
// Layout
// ========================================================================

#[test]
fn test_layout_down_to_parts() {
    let scene = scene();
    let names = |path: &str| scene.child_names(&ScenePath::parse(path)).unwrap();

    assert_eq!(names("/"), vec!["crowd"]);
    assert_eq!(names("/crowd"), vec!["agents"]);
    assert_eq!(names("/crowd/agents"), vec!["robot"]);
    assert_eq!(names("/crowd/agents/robot"), vec!["V1", "V1:low", "V1:mid", "V2"]);
    assert_eq!(names("/crowd/agents/robot/V1"), vec!["5", "9"]);
    assert_eq!(names("/crowd/agents/robot/V1/5"), vec!["body"]);
    assert!(names("/crowd/agents/robot/V1/5/body").is_empty());
    assert_eq!(scene.agent_count(), 5);
}

#[test]
fn test_leaf_paths_are_parts() {
    let scene = scene();
    let leaves = scene.leaf_paths().unwrap();
    assert_eq!(leaves.len(), 6);
    assert!(leaves.contains(&ScenePath::parse("/crowd/agents/robot/V2/10/broken")));
    assert!(leaves.iter().all(|path| scene.child_names(path).unwrap().is_empty()));

    let empty = scene_for(Crowd::from_records(Vec::new()), ExpandOptions::default());
    assert!(empty.leaf_paths().unwrap().is_empty());
}

#[test]
fn test_points_at_parent() {
    let scene = scene();
    let object = scene.object(&ScenePath::parse("/crowd")).unwrap();
    let points = object.as_ref().and_then(SceneObject::as_points).unwrap();
    assert_eq!(points.len(), 6);
}

#[test]
fn test_agent_transform_and_rest_mesh() {
    let scene = scene();
    let path = ScenePath::parse("/crowd/agents/robot/V1/5/body");

    let world = scene.full_transform(&path).unwrap();
    assert_eq!(transform_ops::translation_of(&world), Vector3::new(0.0, 16.0, 0.0));
    assert_eq!(mesh_at(&scene, "/crowd/agents/robot/V1/5/body").positions, quad(0.0).positions);
}

#[test]
fn test_rigid_part_keeps_template_transform() {
    let variations = VariationSet::new().with_variation(
        "robot",
        "V1",
        parts(vec![(
            "body",
            TemplatePart::mesh(quad(0.0))
                .with_transform(Matrix4::from_translation(Vector3::new(0.0, 16.0, 0.0))),
        )]),
    );
    let library = Arc::new(TemplateLibrary::new(Arc::new(variations), LibraryOptions::default()));
    let crowd = Crowd::from_records(vec![AgentRecord::new(5, "robot", "V1")
        .with_poses(vec![Matrix4::identity()], vec![Matrix4::identity()])]);
    let scene = CrowdScene::new(
        Arc::new(crowd),
        library,
        ScenePath::parse("/crowd"),
        Arc::new(InstanceCache::new()),
    );

    let path = ScenePath::parse("/crowd/agents/robot/V1/5/body");
    assert_eq!(
        scene.transform(&path).unwrap(),
        Matrix4::from_translation(Vector3::new(0.0, 16.0, 0.0))
    );
    let mesh = mesh_at(&scene, "/crowd/agents/robot/V1/5/body");
    let rest = quad(0.0);
    assert_eq!(mesh.positions, rest.positions);
    assert_eq!(mesh.verts_per_face, rest.verts_per_face);
    assert_eq!(mesh.vertex_ids, rest.vertex_ids);
}

#[test]
fn test_unknown_paths() {
    let scene = scene();
    for path in [
        "/elsewhere",
        "/crowd/agents/ghost",
        "/crowd/agents/robot/V3",
        "/crowd/agents/robot/V1/05",
        "/crowd/agents/robot/V1/6",
        "/crowd/agents/robot/V1/5/head",
    ] {
        let path = ScenePath::parse(path);
        assert_eq!(
            scene.bound(&path),
            Err(HierarchyError::PathNotFound(path.clone())),
        );
        assert!(!scene.exists(&path));
    }
}

#[test]
fn test_destination_separate_from_parent() {
    let scene = scene().with_destination(ScenePath::parse("/render/crowd"));
    assert_eq!(scene.child_names(&ScenePath::root()).unwrap(), vec!["crowd", "render"]);
    assert!(scene.child_names(&ScenePath::parse("/crowd")).unwrap().is_empty());
    assert!(scene.exists(&ScenePath::parse("/render/crowd/agents/robot/V1/5/body")));
    assert!(!scene.exists(&ScenePath::parse("/crowd/agents")));
}

#[test]
fn test_custom_agents_name() {
    let scene = scene_for(crowd(), ExpandOptions::default().with_name("army"));
    assert!(scene.exists(&ScenePath::parse("/crowd/army/robot/V1/5")));
    assert!(!scene.exists(&ScenePath::parse("/crowd/agents")));
}

// ========================================================================
// Determinism and Instancing
// ========================================================================

fn snapshot(scene: &CrowdScene) -> Vec<(ScenePath, Attributes, Option<Vec<Point3<f32>>>)> {
    let mut collector = PathCollector::default();
    walk_hierarchy(scene, &ScenePath::root(), &mut collector).unwrap();
    collector
        .paths
        .into_iter()
        .map(|path| {
            let attributes = scene.attributes(&path).unwrap();
            let positions = scene
                .object(&path)
                .unwrap()
                .and_then(|object| object.as_mesh().map(|mesh| mesh.positions.clone()));
            (path, attributes, positions)
        })
        .collect()
}

#[test]
fn test_expansion_is_deterministic() {
    assert_eq!(snapshot(&scene()), snapshot(&scene()));
}

#[test]
fn test_instancing_is_transparent() {
    let shared = scene();
    let unique = scene_for(crowd(), ExpandOptions::default().with_instances(false));
    assert_eq!(snapshot(&shared), snapshot(&unique));

    // 5, 9 and the fallback 7 share template and pose.
    assert_eq!(shared.resolve_all(), 3);
    assert_eq!(unique.resolve_all(), 5);
}

#[test]
fn test_concurrent_queries_compute_once() {
    let scene = scene();
    let paths: Vec<ScenePath> = (0..64)
        .map(|i| {
            if i % 2 == 0 {
                ScenePath::parse("/crowd/agents/robot/V1/5/body")
            } else {
                ScenePath::parse("/crowd/agents/robot/V1/9/body")
            }
        })
        .collect();

    let meshes: Vec<Arc<Mesh>> = paths
        .par_iter()
        .map(|path| match scene.object(path) {
            Ok(Some(SceneObject::Mesh(mesh))) => mesh,
            _ => panic!("missing mesh at {}", path),
        })
        .collect();

    assert!(meshes.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    let stats = scene.instances().stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.misses, 1);
}

#[test]
fn test_differing_poses_resolve_separately() {
    let shifted = Matrix4::from_translation(Vector3::new(2.0, 0.0, 0.0));
    let crowd = Crowd::from_records(vec![
        robot(1, "V1", 0.0, 0.0),
        robot(2, "V1", 0.0, 0.0).with_poses(vec![shifted], vec![Matrix4::identity()]),
    ]);
    let scene = scene_for(crowd, ExpandOptions::default());

    let still = mesh_at(&scene, "/crowd/agents/robot/V1/1/body");
    let moved = mesh_at(&scene, "/crowd/agents/robot/V1/2/body");
    assert!(!Arc::ptr_eq(&still, &moved));
    assert_eq!(still.positions, quad(0.0).positions);
    let expected: Vec<Point3<f32>> = quad(0.0)
        .positions
        .iter()
        .map(|p| Point3::new(p.x + 2.0, p.y, p.z))
        .collect();
    assert_eq!(moved.positions, expected);
    assert_eq!(scene.resolve_all(), 2);
}

#[test]
fn test_shared_cache_across_libraries() {
    let library_at = |y: f32| {
        let variations = VariationSet::new().with_variation("robot", "V1", parts(vec![("body", body(y))]));
        Arc::new(TemplateLibrary::new(Arc::new(variations), LibraryOptions::default()))
    };
    let instances = Arc::new(InstanceCache::new());
    let crowd = Arc::new(Crowd::from_records(vec![robot(5, "V1", 0.0, 0.0)]));
    let scene_over = |library: Arc<TemplateLibrary>| {
        CrowdScene::new(
            Arc::clone(&crowd),
            library,
            ScenePath::parse("/crowd"),
            Arc::clone(&instances),
        )
    };

    let ground = scene_over(library_at(0.0));
    let raised = scene_over(library_at(7.0));
    let path = "/crowd/agents/robot/V1/5/body";
    assert_eq!(mesh_at(&ground, path).positions, quad(0.0).positions);
    assert_eq!(mesh_at(&raised, path).positions, quad(7.0).positions);
    assert_eq!(instances.stats().entries, 2);
}

// ========================================================================
// Variations
// ========================================================================

#[test]
fn test_lod_override_and_fallback() {
    let scene = scene();
    let low = mesh_at(&scene, "/crowd/agents/robot/V1:low/6/body");
    assert_eq!(low.positions[0].y, 5.0);
    let mid = mesh_at(&scene, "/crowd/agents/robot/V1:mid/7/body");
    assert_eq!(mid.positions[0].y, 0.0);
}

#[test]
fn test_missing_template_is_omitted() {
    let scene = scene();
    assert!(!scene.set_names().iter().any(|name| name.starts_with("ghost")));
    assert!(scene
        .set("robot")
        .iter()
        .all(|path| !path.to_string().contains("/8/")));
}

#[test]
fn test_malformed_part_isolated() {
    let scene = scene();
    let agent = "/crowd/agents/robot/V2/10";
    assert_eq!(
        scene.child_names(&ScenePath::parse(agent)).unwrap(),
        vec!["body", "broken"]
    );
    assert!(scene
        .object(&ScenePath::parse(&format!("{}/broken", agent)))
        .unwrap()
        .is_none());
    assert_eq!(mesh_at(&scene, &format!("{}/body", agent)).num_vertices(), 4);
}

#[test]
fn test_bad_face_vertex_isolated() {
    let bad = Mesh::new(
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ],
        vec![3, 2],
        vec![0, 1, 2, 0, 9],
    )
    .with_normals(vec![Vector3::unit_z(); 5]);
    let variations = VariationSet::new().with_variation(
        "robot",
        "V1",
        parts(vec![
            ("bad", TemplatePart::mesh(bad).with_skin(SkinBinding::rigid(3, 0))),
            ("body", body(0.0)),
        ]),
    );
    let library = Arc::new(TemplateLibrary::new(Arc::new(variations), LibraryOptions::default()));
    let crowd = Crowd::from_records(vec![robot(5, "V1", 0.0, 0.0)]);
    let scene = CrowdScene::new(
        Arc::new(crowd),
        library,
        ScenePath::parse("/crowd"),
        Arc::new(InstanceCache::new()),
    );

    let agent = "/crowd/agents/robot/V1/5";
    assert!(scene
        .object(&ScenePath::parse(&format!("{}/bad", agent)))
        .unwrap()
        .is_none());
    assert_eq!(mesh_at(&scene, &format!("{}/body", agent)).num_vertices(), 4);
}

// ========================================================================
// Attributes, Bounds and Sets
// ========================================================================

#[test]
fn test_skin_attributes_stripped() {
    let scene = scene();
    let attributes = scene
        .attributes(&ScenePath::parse("/crowd/agents/robot/V1/5/body"))
        .unwrap();
    assert!(!attributes.contains_key("jointIndices"));
    assert_eq!(
        attributes.get("user:side"),
        Some(&AttributeValue::String("center".into()))
    );
}

#[test]
fn test_agent_attributes() {
    let scene = scene();
    let attributes = scene
        .attributes(&ScenePath::parse("/crowd/agents/robot/V1:low/6"))
        .unwrap();
    assert_eq!(attributes.get("atoms:testData"), Some(&AttributeValue::Int(2)));
    assert_eq!(attributes.get("atoms:agentId"), Some(&AttributeValue::Int(6)));
    assert_eq!(
        attributes.get("user:atoms:agentType"),
        Some(&AttributeValue::String("robot".into()))
    );
    assert_eq!(
        attributes.get("user:atoms:variation"),
        Some(&AttributeValue::String("V1".into()))
    );
}

#[test]
fn test_full_attributes_inherit_parent() {
    let mut parent = Attributes::new();
    parent.insert("user:crowdName".into(), AttributeValue::String("army".into()));
    let scene = scene().with_parent_attributes(parent);

    let attributes = scene
        .full_attributes(&ScenePath::parse("/crowd/agents/robot/V1/5/body"))
        .unwrap();
    assert_eq!(
        attributes.get("user:crowdName"),
        Some(&AttributeValue::String("army".into()))
    );
    assert!(attributes.contains_key("user:atoms:agentType"));
    assert!(attributes.contains_key("user:side"));
}

#[test]
fn test_bounds() {
    let scene = scene_for(crowd(), ExpandOptions::default().with_padding(0.5));
    let agent = scene.bound(&ScenePath::parse("/crowd/agents/robot/V1/5")).unwrap();
    assert_eq!(agent.min, Point3::new(-1.5, -0.5, -1.5));
    assert_eq!(agent.max, Point3::new(1.5, 0.5, 1.5));

    let all = scene.bound(&ScenePath::parse("/crowd/agents")).unwrap();
    assert!(all.contains_point(Point3::new(0.0, 16.0, 0.0)));
    assert!(all.contains_point(Point3::new(-4.0, 0.0, 0.0)));

    let explicit = Crowd::from_records(vec![robot(5, "V1", 0.0, 0.0)
        .with_bounding_box(common::Aabb::new(Point3::new(-2.0, 0.0, -2.0), Point3::new(2.0, 3.0, 2.0)))]);
    let scene = scene_for(explicit, ExpandOptions::default());
    let agent = scene.bound(&ScenePath::parse("/crowd/agents/robot/V1/5")).unwrap();
    assert_eq!(agent.max, Point3::new(2.0, 3.0, 2.0));
}

#[test]
fn test_sets() {
    let scene = scene();
    let names = scene.set_names();
    for name in ["robot", "robot:V1", "robot:V1:low", "robot:V1:mid", "robot:V2", "metal"] {
        assert!(names.iter().any(|n| n == name), "missing set {}", name);
    }
    assert!(scene
        .set("robot:V1:mid")
        .contains(&ScenePath::parse("/crowd/agents/robot/V1:mid/7/body")));
    assert_eq!(scene.set("robot:V1").len(), 4);
    assert!(scene.set("nothing").is_empty());
}

// ========================================================================
// Overlays
// ========================================================================

#[test]
fn test_cloth_replaces_skinned_result() {
    let mut cache = ClothCache::new();
    let draped: Vec<Point3<f32>> = quad(-3.0).positions;
    cache.insert(
        5,
        ScenePath::parse("/body"),
        ClothEntry::new(draped.clone(), vec![Vector3::unit_y(); 4]).with_stack_order("first"),
    );
    let scene = scene().with_cloth(Arc::new(cache));

    let body = "/crowd/agents/robot/V1/5/body";
    assert_eq!(mesh_at(&scene, body).positions, draped);
    assert_eq!(
        scene.attributes(&ScenePath::parse(body)).unwrap().get(cloth::STACK_ORDER_ATTRIBUTE),
        Some(&AttributeValue::String("first".into()))
    );
    let bound = scene.bound(&ScenePath::parse(body)).unwrap();
    assert_eq!(bound.min.y, -3.0);

    // Agent 9 shares 5's pose but not its cloth.
    assert_eq!(mesh_at(&scene, "/crowd/agents/robot/V1/9/body").positions, quad(0.0).positions);
}

#[test]
fn test_metadata_overlay_then_expand() {
    let overlay = MetadataOverlay::new("5").with_override("testData", AttributeValue::Int(7));
    let crowd = overlay.apply_to_crowd(&crowd()).unwrap();
    let scene = scene_for(crowd, ExpandOptions::default());

    let attributes = |path: &str| scene.attributes(&ScenePath::parse(path)).unwrap();
    assert_eq!(
        attributes("/crowd/agents/robot/V1/5").get("atoms:testData"),
        Some(&AttributeValue::Int(7))
    );
    assert_eq!(
        attributes("/crowd/agents/robot/V1/9").get("atoms:testData"),
        Some(&AttributeValue::Int(2))
    );
}

#[test]
fn test_reader_to_scene() {
    let mut cache = FrameCache::new();
    cache.insert_frame(1, vec![robot(5, "V1", 0.0, 0.0), robot(9, "V1", 1.0, 0.0)]);
    cache.insert_frame(2, vec![robot(5, "V1", 0.0, 2.0), robot(9, "V1", 1.0, 2.0)]);

    let reader = CrowdReader::new(
        Arc::new(cache),
        ReaderOptions::default().with_time_offset(1.0).with_agent_ids("9"),
    );
    let crowd = reader.read(1.5).unwrap();
    assert_eq!(crowd.agents.keys().copied().collect::<Vec<_>>(), vec![9]);

    let scene = scene_for(crowd, ExpandOptions::default());
    let world = scene
        .full_transform(&ScenePath::parse("/crowd/agents/robot/V1/9"))
        .unwrap();
    assert_eq!(transform_ops::translation_of(&world), Vector3::new(1.0, 2.0, 0.0));
}

#[test]
fn test_blend_weights_change_instances() {
    let shape = mesh::BlendShape {
        positions: quad(1.0).positions,
        normals: Vec::new(),
    };
    let variations = VariationSet::new().with_variation(
        "robot",
        "V1",
        parts(vec![("body", TemplatePart::mesh(quad(0.0).with_blend_shape(shape)))]),
    );
    let library = Arc::new(TemplateLibrary::new(Arc::new(variations), LibraryOptions::default()));
    let crowd = Crowd::from_records(vec![
        robot(1, "V1", 0.0, 0.0).with_metadata("robot_body_0", AttributeValue::Float(0.5)),
        robot(2, "V1", 1.0, 0.0),
    ]);
    let crowd = Arc::new(crowd);
    let scene_with = |config: BlendWeightConfig| {
        CrowdScene::new(
            Arc::clone(&crowd),
            Arc::clone(&library),
            ScenePath::parse("/crowd"),
            Arc::new(InstanceCache::new()),
        )
        .with_options(ExpandOptions::default().with_blend_weights(config))
    };

    let scene = scene_with(BlendWeightConfig::default());
    assert_eq!(mesh_at(&scene, "/crowd/agents/robot/V1/1/body").positions[0].y, 0.5);
    assert_eq!(mesh_at(&scene, "/crowd/agents/robot/V1/2/body").positions[0].y, 0.0);
    assert_eq!(scene.resolve_all(), 2);

    let fixed = scene_with(BlendWeightConfig::fixed(1.0));
    assert_eq!(mesh_at(&fixed, "/crowd/agents/robot/V1/1/body").positions[0].y, 1.0);
    assert_eq!(fixed.resolve_all(), 1);
}
