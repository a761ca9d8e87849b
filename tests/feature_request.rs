use lumina::FeatureRequest;

#[test]
fn display_order_is_fixed() {
    let req = FeatureRequest {
        experimental: true,
        max_nodes_group: 2,
        nodes_features: 5,
        use_hair: true,
        use_volume: true,
        use_principled: true,
        ..FeatureRequest::default()
    };

    let expected = "Experimental features: On\n\
                    Max nodes group: 2\n\
                    Nodes features: 5\n\
                    Use Hair: true\n\
                    Use Object Motion: false\n\
                    Use Camera Motion: false\n\
                    Use Baking: false\n\
                    Use Subsurface: false\n\
                    Use Volume: true\n\
                    Use Branched Integrator: false\n\
                    Use Patch Evaluation: false\n\
                    Use Transparent Shadows: false\n\
                    Use Principled BSDF: true\n\
                    Use Denoising: false\n";
    assert_eq!(req.to_string(), expected);
}

#[test]
fn two_equal_requests_render_identically() {
    let a = FeatureRequest {
        use_baking: true,
        ..FeatureRequest::default()
    };
    let b = a;
    assert_eq!(a, b);
    assert_eq!(a.to_string(), b.to_string());
}
