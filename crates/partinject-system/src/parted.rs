//! Partition enumeration through `parted --machine`.

use crate::command::ToolCommand;
use log::warn;
use partinject_core::error::{InjectError, InjectResult};
use partinject_provider::PartitionDescriptor;
use regex::Regex;
use std::sync::OnceLock;

/// Lists partitions in partition-table order.
#[derive(Debug, Clone)]
pub(crate) struct PartedCommand {
    tool: ToolCommand,
}

impl PartedCommand {
    pub(crate) fn new(tool: ToolCommand) -> Self {
        Self { tool }
    }

    pub(crate) fn list_partitions(&self, device: &str) -> InjectResult<Vec<PartitionDescriptor>> {
        let out = self
            .tool
            .run(["-s", "-m", device, "unit", "MiB", "print"])?;
        if !out.success() {
            return Err(InjectError::Provider(format!(
                "{} could not read the partition table of {device}: {} (exit code {})",
                self.tool.binary().display(),
                out.diagnostic(),
                out.status
            )));
        }
        Ok(parse_parted_output(&out.stdout))
    }
}

/// Parse `parted -s -m <dev> unit MiB print` output.
///
/// The first two lines are the `BYT;` header and the whole-disk summary;
/// every following line describes one partition as
/// `number:start:end:size:filesystem:name:flags;`.
pub(crate) fn parse_parted_output(output: &str) -> Vec<PartitionDescriptor> {
    static PARTED_LINE_RE: OnceLock<Regex> = OnceLock::new();
    let re = PARTED_LINE_RE.get_or_init(|| {
        Regex::new(r"^(\d+):([\d.]+)MiB:([\d.]+)MiB:([\d.]+)MiB:(\w*):(.*):(.*);")
            .expect("valid parted regex")
    });

    let mut partitions = Vec::new();
    for line in output.lines().skip(2) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(caps) = re.captures(line) else {
            warn!("partition information from parted does not match the expected format: {line}");
            continue;
        };
        let Ok(index) = caps[1].parse::<u32>() else {
            warn!("partition number out of range in parted output: {line}");
            continue;
        };

        partitions.push(PartitionDescriptor {
            index,
            start_mib: mib(&caps[2]),
            end_mib: mib(&caps[3]),
            size_mib: mib(&caps[4]),
            filesystem: caps[5].to_string(),
            name: caps[6].to_string(),
            flags: caps[7]
                .split(',')
                .map(str::trim)
                .filter(|flag| !flag.is_empty())
                .map(str::to_string)
                .collect(),
        });
    }
    partitions
}

// parted prints fractional MiB; the integer part is enough for diagnostics.
fn mib(value: &str) -> u64 {
    value.parse::<f64>().map(|v| v as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::tests::fake_binary;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    const GPT_LAYOUT: &str = "BYT;\n\
/dev/nvme0n1:476940MiB:nvme:512:512:gpt:Samsung SSD 970:;\n\
1:1.00MiB:513MiB:512MiB:fat32:EFI System Partition:boot, esp;\n\
2:513MiB:1537MiB:1024MiB:ext4::;\n\
3:1537MiB:476939MiB:475402MiB::root:lvm;\n";

    #[test]
    fn parses_partitions_in_table_order() {
        let parts = parse_parted_output(GPT_LAYOUT);
        let indices: Vec<u32> = parts.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);

        assert_eq!(parts[0].start_mib, 1);
        assert_eq!(parts[0].size_mib, 512);
        assert_eq!(parts[0].filesystem, "fat32");
        assert_eq!(parts[0].name, "EFI System Partition");
        assert_eq!(
            parts[0].flags,
            BTreeSet::from(["boot".to_string(), "esp".to_string()])
        );

        assert_eq!(parts[1].filesystem, "ext4");
        assert!(parts[1].flags.is_empty());

        assert_eq!(parts[2].filesystem, "");
        assert_eq!(parts[2].name, "root");
        assert!(parts[2].has_flag("lvm"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let output = "BYT;\n/dev/sda:10240MiB:scsi:512:512:msdos:QEMU HARDDISK:;\n\
garbage line\n\
2:1.00MiB:10239MiB:10238MiB:xfs::;\n";
        let parts = parse_parted_output(output);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].index, 2);
        assert_eq!(parts[0].filesystem, "xfs");
    }

    #[test]
    fn empty_table_yields_no_partitions() {
        assert!(parse_parted_output("BYT;\n/dev/sdb:100MiB:scsi:512:512:unknown:X:;\n").is_empty());
        assert!(parse_parted_output("").is_empty());
    }

    #[test]
    fn list_partitions_invokes_parted_in_machine_mode() {
        let dir = tempdir().unwrap();
        let args_log = dir.path().join("args");
        let body = format!(
            "echo \"$@\" > {}\nprintf 'BYT;\\n/dev/sda:1MiB:scsi:512:512:gpt:X:;\\n1:1.00MiB:2MiB:1MiB:ext4::;\\n'",
            args_log.display()
        );
        let bin = fake_binary(dir.path(), "parted", &body);

        let parted = PartedCommand::new(ToolCommand::new(bin, None));
        let parts = parted.list_partitions("/dev/sda").unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(
            std::fs::read_to_string(&args_log).unwrap().trim(),
            "-s -m /dev/sda unit MiB print"
        );
    }

    #[test]
    fn parted_failure_is_a_provider_error() {
        let dir = tempdir().unwrap();
        let bin = fake_binary(dir.path(), "parted", "echo 'Error: Could not stat device' >&2; exit 1");
        let err = PartedCommand::new(ToolCommand::new(bin, None))
            .list_partitions("/dev/missing")
            .unwrap_err();
        match err {
            InjectError::Provider(message) => assert!(message.contains("Could not stat device")),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
