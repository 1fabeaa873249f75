// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/// Splits a path into `(is_absolute, components, trailing_slash)`. Empty
/// components and `.` are dropped; `..` is kept as a real navigation step.
pub fn split(path: &str) -> (bool, Vec<&str>, bool) {
    let is_absolute = path.starts_with('/');
    let trailing_slash = (path.len() > 1 && path.ends_with('/')) || path == "/";
    let components = path
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();
    (is_absolute, components, trailing_slash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_absolute_path() {
        let (abs, comps, trailing) = split("/a/b");
        assert!(abs);
        assert_eq!(comps, vec!["a", "b"]);
        assert!(!trailing);
    }

    #[test]
    fn drops_empty_and_dot_components() {
        let (_, comps, _) = split("a//./b/");
        assert_eq!(comps, vec!["a", "b"]);
    }

    #[test]
    fn keeps_dotdot_components() {
        let (_, comps, _) = split("../a");
        assert_eq!(comps, vec!["..", "a"]);
    }

    #[test]
    fn root_alone_is_trailing_with_no_components() {
        let (abs, comps, trailing) = split("/");
        assert!(abs);
        assert!(comps.is_empty());
        assert!(trailing);
    }
}
