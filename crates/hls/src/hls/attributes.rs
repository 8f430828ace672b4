/// A parsed `NAME=VALUE,NAME="VALUE"` attribute list.
///
/// Commas inside quoted strings do not split attributes, and quoted values
/// are returned without their quotes.
#[derive(Debug, Default)]
pub struct AttributeList<'a> {
    attributes: Vec<(&'a str, &'a str)>,
}

impl<'a> AttributeList<'a> {
    pub fn parse(input: &'a str) -> Self {
        let mut attributes = Vec::new();
        let mut in_quotes = false;
        let mut start = 0;

        for (i, c) in input.char_indices() {
            match c {
                '"' => in_quotes = !in_quotes,
                ',' if !in_quotes => {
                    push_attribute(&mut attributes, &input[start..i]);
                    start = i + 1;
                }
                _ => {}
            }
        }
        push_attribute(&mut attributes, &input[start..]);

        Self { attributes }
    }

    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| *value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

fn push_attribute<'a>(attributes: &mut Vec<(&'a str, &'a str)>, pair: &'a str) {
    let Some((key, value)) = pair.split_once('=') else {
        if !pair.trim().is_empty() {
            log::debug!("Ignoring malformed attribute: {pair}");
        }
        return;
    };

    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    attributes.push((key.trim(), value));
}
