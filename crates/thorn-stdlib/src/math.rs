//! Math functions. Trigonometry works in degrees.

use crate::register_fn;
use std::cell::Cell;
use std::rc::Rc;
use thorn_core::gc::{GcHeap, GcIdx, NativeContext, NativeError, NativeResult};
use thorn_core::string::StringInterner;
use thorn_core::table::Table;
use thorn_core::value::Value;

const DEFAULT_SEED: u64 = 0x1234_5678_9abc_def0;

/// SplitMix64 state owned by one runtime.
#[derive(Clone, Debug)]
pub struct Rng(Rc<Cell<u64>>);

impl Rng {
    pub fn new(seed: u64) -> Self {
        Rng(Rc::new(Cell::new(seed)))
    }

    pub fn seed(&self, seed: u64) {
        self.0.set(seed);
    }

    pub fn next_u64(&self) -> u64 {
        let s = self.0.get().wrapping_add(0x9e37_79b9_7f4a_7c15);
        self.0.set(s);
        let mut z = s;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    /// Uniform in `[0, 1)`.
    pub fn next_unit(&self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

pub fn register(env: GcIdx<Table>, gc: &mut GcHeap, strings: &mut StringInterner) {
    register_fn(gc, env, strings, "abs", native_abs);
    register_fn(gc, env, strings, "ceil", native_ceil);
    register_fn(gc, env, strings, "floor", native_floor);
    register_fn(gc, env, strings, "sqrt", native_sqrt);
    register_fn(gc, env, strings, "exp", native_exp);
    register_fn(gc, env, strings, "log", native_log);
    register_fn(gc, env, strings, "log10", native_log10);
    register_fn(gc, env, strings, "sin", native_sin);
    register_fn(gc, env, strings, "cos", native_cos);
    register_fn(gc, env, strings, "tan", native_tan);
    register_fn(gc, env, strings, "asin", native_asin);
    register_fn(gc, env, strings, "acos", native_acos);
    register_fn(gc, env, strings, "atan", native_atan);
    register_fn(gc, env, strings, "atan2", native_atan2);
    register_fn(gc, env, strings, "deg", native_deg);
    register_fn(gc, env, strings, "rad", native_rad);
    register_fn(gc, env, strings, "mod", native_mod);
    register_fn(gc, env, strings, "min", native_min);
    register_fn(gc, env, strings, "max", native_max);

    let rng = Rng::new(DEFAULT_SEED);
    let r = rng.clone();
    let random_idx = gc.alloc_native(move |ctx: &mut NativeContext| random(&r, ctx), "random");
    gc.set_field(strings, env, "random", Value::Native(random_idx));
    let seed_idx = gc.alloc_native(
        move |ctx: &mut NativeContext| {
            let x = ctx.opt_number(0, "randomseed", 0.0)?;
            rng.seed(x.to_bits() as u64);
            Ok(vec![])
        },
        "randomseed",
    );
    gc.set_field(strings, env, "randomseed", Value::Native(seed_idx));

    gc.set_field(strings, env, "PI", Value::Number(std::f32::consts::PI));
}

fn unary(ctx: &NativeContext, fname: &str, f: impl Fn(f32) -> f32) -> NativeResult {
    let x = ctx.check_number(0, fname)?;
    Ok(vec![Value::Number(f(x))])
}

fn native_abs(ctx: &mut NativeContext) -> NativeResult {
    unary(ctx, "abs", f32::abs)
}

fn native_ceil(ctx: &mut NativeContext) -> NativeResult {
    unary(ctx, "ceil", f32::ceil)
}

fn native_floor(ctx: &mut NativeContext) -> NativeResult {
    unary(ctx, "floor", f32::floor)
}

fn native_sqrt(ctx: &mut NativeContext) -> NativeResult {
    unary(ctx, "sqrt", f32::sqrt)
}

fn native_exp(ctx: &mut NativeContext) -> NativeResult {
    unary(ctx, "exp", f32::exp)
}

fn native_log(ctx: &mut NativeContext) -> NativeResult {
    unary(ctx, "log", f32::ln)
}

fn native_log10(ctx: &mut NativeContext) -> NativeResult {
    unary(ctx, "log10", f32::log10)
}

fn native_sin(ctx: &mut NativeContext) -> NativeResult {
    unary(ctx, "sin", |x| x.to_radians().sin())
}

fn native_cos(ctx: &mut NativeContext) -> NativeResult {
    unary(ctx, "cos", |x| x.to_radians().cos())
}

fn native_tan(ctx: &mut NativeContext) -> NativeResult {
    unary(ctx, "tan", |x| x.to_radians().tan())
}

fn native_asin(ctx: &mut NativeContext) -> NativeResult {
    unary(ctx, "asin", |x| x.asin().to_degrees())
}

fn native_acos(ctx: &mut NativeContext) -> NativeResult {
    unary(ctx, "acos", |x| x.acos().to_degrees())
}

fn native_atan(ctx: &mut NativeContext) -> NativeResult {
    unary(ctx, "atan", |x| x.atan().to_degrees())
}

fn native_atan2(ctx: &mut NativeContext) -> NativeResult {
    let y = ctx.check_number(0, "atan2")?;
    let x = ctx.check_number(1, "atan2")?;
    Ok(vec![Value::Number(y.atan2(x).to_degrees())])
}

fn native_deg(ctx: &mut NativeContext) -> NativeResult {
    unary(ctx, "deg", f32::to_degrees)
}

fn native_rad(ctx: &mut NativeContext) -> NativeResult {
    unary(ctx, "rad", f32::to_radians)
}

/// C `fmod`: the result takes the sign of the dividend.
fn native_mod(ctx: &mut NativeContext) -> NativeResult {
    let a = ctx.check_number(0, "mod")?;
    let b = ctx.check_number(1, "mod")?;
    Ok(vec![Value::Number(a % b)])
}

fn fold(ctx: &NativeContext, fname: &str, pick: impl Fn(f32, f32) -> bool) -> NativeResult {
    let mut best = ctx.check_number(0, fname)?;
    for n in 1..ctx.args.len() {
        let x = ctx.check_number(n, fname)?;
        if pick(x, best) {
            best = x;
        }
    }
    Ok(vec![Value::Number(best)])
}

fn native_min(ctx: &mut NativeContext) -> NativeResult {
    fold(ctx, "min", |x, best| x < best)
}

fn native_max(ctx: &mut NativeContext) -> NativeResult {
    fold(ctx, "max", |x, best| x > best)
}

/// `random()` in `[0,1)`, `random(m)` in `[1,m]`, `random(m,n)` in `[m,n]`.
fn random(rng: &Rng, ctx: &mut NativeContext) -> NativeResult {
    let r = rng.next_unit();
    let (lo, hi) = match ctx.args.len() {
        0 => return Ok(vec![Value::Number(r as f32)]),
        1 => (1.0, ctx.check_number(0, "random")?),
        _ => (ctx.check_number(0, "random")?, ctx.check_number(1, "random")?),
    };
    let (lo, hi) = (lo.floor() as f64, hi.floor() as f64);
    if lo > hi {
        return Err(NativeError::Message(
            "bad argument to 'random' (interval is empty)".to_string(),
        ));
    }
    Ok(vec![Value::Number((r * (hi - lo + 1.0)).floor() as f32 + lo as f32)])
}
