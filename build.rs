use std::env;

fn main() {
    // Distributions ship z3 versions of varying age, so a libz3.so placed in the project root takes
    // precedence, together with LD_LIBRARY_PATH when running
    println!("cargo:rustc-link-search=.");
    println!("cargo:rerun-if-env-changed=SYMRT_STATIC_Z3");

    // Alternatively link a libz3.a from the project root statically, so the runtime can be
    // injected into instrumented programs without a shared z3 at hand
    if env::var("SYMRT_STATIC_Z3").is_ok() {
        println!("cargo:rustc-link-lib=static=stdc++");
        println!("cargo:rustc-link-lib=static=z3");
    }
}
