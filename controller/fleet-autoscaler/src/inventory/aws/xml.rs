//! Just enough XML reading for Query API responses.
//!
//! Responses are small, namespace-free apart from the root, and never use
//! CDATA, so element lookup is done by scanning tags and tracking depth.

/// Inner content of every element named `tag` that is a direct child of `xml`.
pub fn children<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let mut found = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut pos = 0;

    while let Some(offset) = xml[pos..].find('<') {
        let open = pos + offset;
        let Some(len) = xml[open..].find('>') else {
            break;
        };
        let close = open + len;
        let token = &xml[open + 1..close];
        pos = close + 1;

        if token.starts_with('?') || token.starts_with('!') {
            continue;
        }

        if let Some(name) = token.strip_prefix('/') {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                if let Some(content_start) = start.take() {
                    if name.trim() == tag {
                        found.push(&xml[content_start..open]);
                    }
                }
            }
            continue;
        }

        let self_closing = token.ends_with('/');
        let name = token
            .trim_end_matches('/')
            .split_whitespace()
            .next()
            .unwrap_or_default();
        if self_closing {
            if depth == 0 && name == tag {
                found.push("");
            }
            continue;
        }
        if depth == 0 && name == tag {
            start = Some(pos);
        }
        depth += 1;
    }

    found
}

/// The first direct child named `tag`.
pub fn child<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    children(xml, tag).into_iter().next()
}

/// Text of the first direct child named `tag`, with entities decoded.
pub fn child_text(xml: &str, tag: &str) -> Option<String> {
    child(xml, tag).map(|text| unescape(text.trim()))
}

/// Walk a path of nested direct children.
pub fn descend<'a>(xml: &'a str, path: &[&str]) -> Option<&'a str> {
    path.iter().try_fold(xml, |node, tag| child(node, tag))
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUPS: &str = r#"<?xml version="1.0"?>
<DescribeAutoScalingGroupsResponse xmlns="http://autoscaling.amazonaws.com/doc/2011-01-01/">
  <DescribeAutoScalingGroupsResult>
    <AutoScalingGroups>
      <member>
        <AutoScalingGroupName>web</AutoScalingGroupName>
        <Instances>
          <member><InstanceId>i-1</InstanceId></member>
          <member><InstanceId>i-2</InstanceId></member>
        </Instances>
      </member>
      <member>
        <AutoScalingGroupName>jobs &amp; cron</AutoScalingGroupName>
        <Instances/>
      </member>
    </AutoScalingGroups>
  </DescribeAutoScalingGroupsResult>
</DescribeAutoScalingGroupsResponse>"#;

    #[test]
    fn test_nested_members_stay_with_their_parent() {
        let groups = descend(
            GROUPS,
            &[
                "DescribeAutoScalingGroupsResponse",
                "DescribeAutoScalingGroupsResult",
                "AutoScalingGroups",
            ],
        )
        .unwrap();

        let members = children(groups, "member");
        assert_eq!(members.len(), 2);
        assert_eq!(child_text(members[0], "AutoScalingGroupName").unwrap(), "web");
        assert_eq!(
            child_text(members[1], "AutoScalingGroupName").unwrap(),
            "jobs & cron"
        );

        let instances = child(members[0], "Instances").unwrap();
        let ids: Vec<String> = children(instances, "member")
            .into_iter()
            .filter_map(|m| child_text(m, "InstanceId"))
            .collect();
        assert_eq!(ids, vec!["i-1", "i-2"]);

        assert_eq!(child(members[1], "Instances"), Some(""));
    }

    #[test]
    fn test_only_direct_children_match() {
        let xml = "<a><b><c>deep</c></b><c>shallow</c></a>";
        let a = child(xml, "a").unwrap();
        assert_eq!(child_text(a, "c").unwrap(), "shallow");
        assert!(child(a, "missing").is_none());
    }
}
