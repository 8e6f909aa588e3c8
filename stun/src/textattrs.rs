use crate::attributes::*;
use crate::error::*;
use crate::message::*;

/// A text-valued attribute such as USERNAME or SOFTWARE.
#[derive(Debug, Default, Clone)]
pub struct TextAttribute {
    pub attr: AttrType,
    pub text: String,
}

impl TextAttribute {
    pub fn new(attr: AttrType, text: String) -> Self {
        TextAttribute { attr, text }
    }

    pub fn get_from_as(m: &Message, attr: AttrType) -> Result<TextAttribute> {
        let v = m.get(attr)?;
        let text = String::from_utf8(v).map_err(|e| Error::Other(e.to_string()))?;
        Ok(TextAttribute { attr, text })
    }
}

impl Setter for TextAttribute {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(self.attr, self.text.as_bytes());
        Ok(())
    }
}

/// A 32-bit valued attribute (PRIORITY).
#[derive(Debug, Default, Clone, Copy)]
pub struct U32Attribute {
    pub attr: AttrType,
    pub value: u32,
}

impl Setter for U32Attribute {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(self.attr, &self.value.to_be_bytes());
        Ok(())
    }
}

/// A 64-bit valued attribute (ICE-CONTROLLING).
#[derive(Debug, Default, Clone, Copy)]
pub struct U64Attribute {
    pub attr: AttrType,
    pub value: u64,
}

impl Setter for U64Attribute {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(self.attr, &self.value.to_be_bytes());
        Ok(())
    }
}

/// A zero-length flag attribute (USE-CANDIDATE).
#[derive(Debug, Default, Clone, Copy)]
pub struct FlagAttribute {
    pub attr: AttrType,
}

impl Setter for FlagAttribute {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(self.attr, &[]);
        Ok(())
    }
}

/// Reads the error code from an ERROR-CODE attribute, if present.
pub fn find_error_code(m: &Message) -> Option<u32> {
    let v = m.get(ATTR_ERROR_CODE).ok()?;
    if v.len() < 4 {
        return None;
    }
    let class = (v[2] & 0x07) as u32;
    let number = v[3] as u32;
    Some(class * 100 + number)
}
