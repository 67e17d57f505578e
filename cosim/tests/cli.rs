use cosim_core::Descriptor;
use std::process::Command;

fn cosim() -> Command {
    Command::new(env!("CARGO_BIN_EXE_cosim"))
}

#[test]
fn generate_writes_a_descriptor() -> anyhow::Result<()> {
    let out = std::env::temp_dir().join(format!("cosim-generate-{}.json", std::process::id()));
    let status = cosim()
        .args(["generate", "--model", "gain:2", "--host", "127.0.0.1", "--port", "5010"])
        .arg("--out")
        .arg(&out)
        .status()?;
    assert_eq!(status.code(), Some(0));

    let descriptor = Descriptor::load(&out)?;
    assert_eq!(descriptor.name, "gain");
    assert_eq!(descriptor.control_endpoint().port, 5010);
    assert_eq!(descriptor.data_endpoint().port, 5011);
    assert_eq!(descriptor.variables.len(), 2);
    std::fs::remove_file(out)?;
    Ok(())
}

#[test]
fn generate_without_a_port_fails() -> anyhow::Result<()> {
    let output = cosim()
        .args(["generate", "--model", "ramp", "--host", "127.0.0.1", "--out", "ramp.json"])
        .output()?;
    assert_eq!(output.status.code(), Some(2));
    Ok(())
}

#[test]
fn unknown_model_fails() -> anyhow::Result<()> {
    let out = std::env::temp_dir().join(format!("cosim-unknown-{}.json", std::process::id()));
    let status = cosim()
        .args(["generate", "--model", "pid", "--host", "127.0.0.1", "--port", "5000"])
        .arg("--out")
        .arg(&out)
        .status()?;
    assert_eq!(status.code(), Some(2));
    assert!(!out.exists());
    Ok(())
}
