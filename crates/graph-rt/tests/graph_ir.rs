use graph_rt::graph::builders::{add, constant, convert, multiply, parameter, reshape};
use graph_rt::graph::op::{registered_ops, InferFn};
use graph_rt::graph::{register_op, Attr, Attrs, Node, OpContext, OpDef};
use graph_rt::tensor::TensorDesc;
use graph_rt::{type_of, ElementType, Error, Function, Result};

fn sample_function() -> Function {
    let a = parameter(ElementType::F32, [2, 3]).unwrap();
    let b = parameter(ElementType::F32, [2, 3]).unwrap();
    let bias = constant([2, 3], &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let sum = add(&a, &bias).unwrap();
    let product = multiply(&sum, &b).unwrap();
    let flat = reshape(&product, [6]).unwrap();
    let ints = convert(&flat, ElementType::I64).unwrap();
    Function::with_name("sample", [&ints, &flat], [a, b]).unwrap()
}

#[test]
fn serialized_form_round_trips_with_revalidation() -> anyhow::Result<()> {
    let original = sample_function();
    let restored = Function::from_serialized(original.to_serialized()?)?;

    assert_eq!(restored.name(), "sample");
    assert_eq!(restored.fingerprint(), original.fingerprint());
    assert_eq!(restored.parameter_descriptors(), original.parameter_descriptors());
    assert_eq!(restored.result_descriptors(), original.result_descriptors());
    assert_eq!(restored.ordered_nodes().len(), original.ordered_nodes().len());
    Ok(())
}

#[test]
fn json_rendering_names_ops_and_types() {
    let json: serde_json::Value =
        serde_json::from_str(&sample_function().to_json_string().unwrap()).unwrap();
    assert_eq!(json["name"], "sample");
    let text = json.to_string();
    for needle in ["\"Add\"", "\"Multiply\"", "\"Reshape\"", "\"Convert\"", "\"i64\""] {
        assert!(text.contains(needle), "missing {needle} in {text}");
    }
}

#[test]
fn element_types_resolve_by_name() {
    assert_eq!(type_of("f32").unwrap(), ElementType::F32);
    assert_eq!(type_of("boolean").unwrap().native_name(), "char");
    assert_eq!(type_of("bfloat16"), Err(Error::UnknownType("bfloat16".to_string())));
}

fn infer_scale(ctx: &OpContext<'_>) -> Result<Vec<TensorDesc>> {
    match ctx.attr("factor")? {
        Attr::Float(_) => Ok(vec![ctx.inputs[0].clone()]),
        _ => Err(Error::attribute(ctx.op, "factor", "expected a float")),
    }
}

#[test]
fn registered_ops_take_part_in_construction_and_fingerprints() {
    let infer: InferFn = infer_scale;
    assert!(register_op(OpDef::new("GraphIrScale", 1, infer)));
    assert!(!register_op(OpDef::new("GraphIrScale", 1, infer)));
    assert!(registered_ops().contains(&"GraphIrScale".to_string()));

    let build = |factor: Attr| -> Result<Function> {
        let x = parameter(ElementType::F64, [4])?;
        let attrs: Attrs = [("factor".to_string(), factor)].into_iter().collect();
        let scaled = Node::operation("GraphIrScale", vec![x.clone().into()], attrs)?;
        Function::new([&scaled], [x])
    };
    let half = build(Attr::Float(0.5)).unwrap();
    let twice = build(Attr::Float(2.0)).unwrap();
    assert_ne!(half.fingerprint(), twice.fingerprint());
    assert_eq!(half.fingerprint(), build(Attr::Float(0.5)).unwrap().fingerprint());

    assert!(matches!(
        build(Attr::Int(2)),
        Err(Error::InvalidAttribute { .. })
    ));
    let x = parameter(ElementType::F64, [4]).unwrap();
    assert!(matches!(
        Node::operation("GraphIrScale", vec![x.clone().into(), x.into()], Attrs::new()),
        Err(Error::ArityMismatch { .. })
    ));
    assert!(matches!(
        Node::operation("NoSuchOp", vec![], Attrs::new()),
        Err(Error::UnknownOp(_))
    ));
}
