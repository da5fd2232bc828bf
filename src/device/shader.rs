//! WGSL generation for the accelerator backend.
//!
//! Every shader reads its partition from a uniform `Division` and lets each
//! invocation act as one unit of a [`WorkDiv`](crate::work::WorkDiv). Units are laid
//! out over two dispatch dimensions so that large divisions fit the per-dimension limit.

/// Invocations per workgroup.
pub const WORKGROUP_SIZE: u32 = 64;

const DIVISION: &str = r#"struct Division {
    len: u32,
    elems: u32,
    units: u32,
    stride: u32,
};
"#;

fn entry(body: &str) -> String {
    format!(
        r#"@compute @workgroup_size({WORKGROUP_SIZE}, 1, 1)
fn main(@builtin(global_invocation_id) invocation: vec3<u32>) {{
    let unit = invocation.x + invocation.y * division.stride;
    if unit >= division.units {{
        return;
    }}
    let lo = unit * division.elems;
    if lo >= division.len {{
        return;
    }}
    let hi = min(lo + division.elems, division.len);
    for (var i = lo; i < hi; i += 1u) {{
{body}
    }}
}}
"#
    )
}

/// Element-wise binary transform. `expr` may refer to the operands `a` and `b`.
pub fn transform(ty: &str, expr: &str) -> String {
    let body = format!(
        r#"        let a = lhs[i];
        let b = rhs[i];
        dst[i] = {expr};"#
    );
    format!(
        r#"{DIVISION}
@group(0) @binding(0) var<storage, read> lhs: array<{ty}>;
@group(0) @binding(1) var<storage, read> rhs: array<{ty}>;
@group(0) @binding(2) var<storage, read_write> dst: array<{ty}>;
@group(0) @binding(3) var<uniform> division: Division;

{}"#,
        entry(&body)
    )
}

/// Index generator. `expr` may refer to the element index `i` (a `u32`).
pub fn launch(ty: &str, expr: &str) -> String {
    let body = format!("        dst[i] = {expr};");
    format!(
        r#"{DIVISION}
@group(0) @binding(0) var<storage, read_write> dst: array<{ty}>;
@group(0) @binding(1) var<uniform> division: Division;

{}"#,
        entry(&body)
    )
}
