//! Sykli CI pipeline for rollprobe
//!
//! Run locally: sykli run
//! Or: cargo run --bin sykli --features sykli -- --emit | sykli run -

use sykli::{Condition, Pipeline, Template};

fn main() {
    let mut p = Pipeline::new();

    // === RESOURCES ===
    let src = p.dir(".");
    let cargo_registry = p.cache("cargo-registry");
    let cargo_git = p.cache("cargo-git");
    let target_cache = p.cache("target");

    // === TEMPLATE ===
    let rust = Template::new()
        .container("rust:1.85")
        .mount_dir(&src, "/src")
        .mount_cache(&cargo_registry, "/usr/local/cargo/registry")
        .mount_cache(&cargo_git, "/usr/local/cargo/git")
        .mount_cache(&target_cache, "/src/target")
        .workdir("/src");

    // === TASKS ===

    // Unit tests, including the in-process harness runs against the probed service
    let _ = p
        .task("test")
        .from(&rust)
        .run("cargo test")
        .inputs(&["**/*.rs", "Cargo.toml", "Cargo.lock"]);

    let _ = p
        .task("lint")
        .from(&rust)
        .run("cargo clippy --all-targets -- -D warnings")
        .inputs(&["**/*.rs", "Cargo.toml", "Cargo.lock"]);

    let _ = p
        .task("fmt")
        .from(&rust)
        .run("cargo fmt -- --check")
        .inputs(&["**/*.rs"]);

    // Harness and probed service binaries
    let _ = p
        .task("build")
        .from(&rust)
        .run("cargo build --release --bin rollprobe --bin probed-service")
        .inputs(&["**/*.rs", "Cargo.toml", "Cargo.lock"])
        .output("harness", "target/release/rollprobe")
        .after(&["test", "lint", "fmt"]);

    // Every scenario against a kind cluster
    // LoadBalancer addresses come from cloud-provider-kind
    let _ = p
        .task("scenarios")
        .container("ghcr.io/sykli/kind-runner:latest")
        .mount(&src, "/src")
        .workdir("/src")
        .run(
            r#"#!/bin/bash
set -e

kind create cluster --name rollprobe-ci
cloud-provider-kind > /tmp/cloud-provider-kind.log 2>&1 &
CPK_PID=$!

docker build -f deploy/Dockerfile -t rollprobe/probed-service:latest .
kind load docker-image rollprobe/probed-service:latest --name rollprobe-ci

STATUS=0
RUST_LOG=info ./target/release/rollprobe --manifest-dir deploy > /tmp/reports.json || STATUS=$?
cat /tmp/reports.json

kill $CPK_PID || true
kind delete cluster --name rollprobe-ci || true
exit $STATUS
"#,
        )
        .input_from("build", "harness", "/src/target/release/rollprobe")
        .when_cond(Condition::event("push").or(Condition::negate(Condition::branch("*"))))
        .timeout(3600);

    p.emit();
}
